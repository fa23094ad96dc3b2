use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use derive_new::new;

use super::{
    cast_local_source_state, GlobalSinkStateRef, GlobalSourceState, GlobalSourceStateRef,
    LocalSourceState, PartitionDescriptor, PhysicalOperator, PhysicalOperatorBase,
    PipelineSource, StatelessSourceState,
};
use crate::execution::{ExecutionContext, ExecutorError, VECTOR_SIZE};

/// The PhysicalColumnDataScan scans a collection of Arrow RecordBatches held by the plan. It
/// never partitions, so pipelines starting from it always run as a single task.
#[derive(Debug)]
pub struct PhysicalColumnDataScan {
    pub(crate) base: PhysicalOperatorBase,
    pub(crate) collection: Vec<RecordBatch>,
}

impl PhysicalColumnDataScan {
    pub fn try_new(
        schema: SchemaRef,
        collection: Vec<RecordBatch>,
    ) -> Result<Arc<Self>, ExecutorError> {
        let collection = collection
            .into_iter()
            .map(|batch| RecordBatch::try_new(schema.clone(), batch.columns().to_vec()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Arc::new(Self {
            base: PhysicalOperatorBase::new(vec![], schema),
            collection,
        }))
    }
}

#[derive(new, Debug, Default)]
pub struct ColumnDataScanLocalSourceState {
    batch_idx: usize,
    offset: usize,
}

impl LocalSourceState for ColumnDataScanLocalSourceState {}

impl PhysicalOperator for PhysicalColumnDataScan {
    fn name(&self) -> &str {
        "ColumnDataScan"
    }

    fn base(&self) -> &PhysicalOperatorBase {
        &self.base
    }

    fn into_source(self: Arc<Self>) -> Option<Arc<dyn PipelineSource>> {
        Some(self)
    }
}

impl PipelineSource for PhysicalColumnDataScan {
    fn global_source_state(
        &self,
        _context: &ExecutionContext,
        _input: Option<&GlobalSinkStateRef>,
    ) -> Result<GlobalSourceStateRef, ExecutorError> {
        Ok(Arc::new(StatelessSourceState))
    }

    fn local_source_state(
        &self,
        _context: &ExecutionContext,
        _gstate: &dyn GlobalSourceState,
        _partition: Option<&PartitionDescriptor>,
    ) -> Result<Box<dyn LocalSourceState>, ExecutorError> {
        Ok(Box::new(ColumnDataScanLocalSourceState::default()))
    }

    fn get_data(
        &self,
        _context: &ExecutionContext,
        _gstate: &dyn GlobalSourceState,
        lstate: &mut dyn LocalSourceState,
    ) -> Result<RecordBatch, ExecutorError> {
        let state = cast_local_source_state::<ColumnDataScanLocalSourceState>(lstate)?;
        while let Some(batch) = self.collection.get(state.batch_idx) {
            if state.offset >= batch.num_rows() {
                state.batch_idx += 1;
                state.offset = 0;
                continue;
            }
            // oversized batches are handed out VECTOR_SIZE rows at a time
            let len = (batch.num_rows() - state.offset).min(VECTOR_SIZE);
            let chunk = batch.slice(state.offset, len);
            state.offset += len;
            return Ok(chunk);
        }
        Ok(RecordBatch::new_empty(self.schema()))
    }
}
