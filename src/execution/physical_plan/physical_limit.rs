use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use parking_lot::Mutex;

use super::{
    cast_global_sink_state, cast_global_sink_state_arc, materialized_get_data,
    materialized_local_source_state, required_input, GlobalSinkState, GlobalSinkStateRef,
    GlobalSourceState, GlobalSourceStateRef, LocalSinkState, LocalSourceState,
    MaterializedSourceState, PartitionDescriptor, PhysicalOperator, PhysicalOperatorBase,
    PhysicalOperatorRef, PipelineSink, PipelineSource, SinkFinalizeType, SinkResultType,
};
use crate::execution::{ExecutionContext, ExecutorError};

/// Keeps `limit` rows after skipping `offset` rows. The limit consumes its input in order, so it is
/// never parallel, and it finishes the feeding pipeline as soon as enough rows arrived.
#[derive(Debug)]
pub struct PhysicalLimit {
    pub(crate) base: PhysicalOperatorBase,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
}

impl PhysicalLimit {
    pub fn new(child: PhysicalOperatorRef, limit: Option<u64>, offset: Option<u64>) -> Arc<Self> {
        let base = PhysicalOperatorBase::new(vec![child.clone()], child.schema());
        Arc::new(Self {
            base,
            limit,
            offset,
        })
    }
}

#[derive(Debug, Default)]
struct LimitProgress {
    returned_count: u64,
    batches: Vec<RecordBatch>,
}

#[derive(Debug, Default)]
pub struct LimitGlobalState {
    progress: Mutex<LimitProgress>,
}

impl GlobalSinkState for LimitGlobalState {}

#[derive(Debug)]
pub struct LimitLocalState;

impl LocalSinkState for LimitLocalState {}

impl PhysicalOperator for PhysicalLimit {
    fn name(&self) -> &str {
        "Limit"
    }

    fn base(&self) -> &PhysicalOperatorBase {
        &self.base
    }

    fn into_source(self: Arc<Self>) -> Option<Arc<dyn PipelineSource>> {
        Some(self)
    }

    fn into_sink(self: Arc<Self>) -> Option<Arc<dyn PipelineSink>> {
        Some(self)
    }
}

impl PipelineSink for PhysicalLimit {
    fn global_sink_state(
        &self,
        _context: &ExecutionContext,
    ) -> Result<Arc<dyn GlobalSinkState>, ExecutorError> {
        Ok(Arc::new(LimitGlobalState::default()))
    }

    fn local_sink_state(
        &self,
        _context: &ExecutionContext,
        _gstate: &dyn GlobalSinkState,
    ) -> Result<Box<dyn LocalSinkState>, ExecutorError> {
        Ok(Box::new(LimitLocalState))
    }

    fn sink(
        &self,
        _context: &ExecutionContext,
        gstate: &dyn GlobalSinkState,
        _lstate: &mut dyn LocalSinkState,
        input: &RecordBatch,
    ) -> Result<SinkResultType, ExecutorError> {
        let gstate = cast_global_sink_state::<LimitGlobalState>(gstate)?;
        let mut progress = gstate.progress.lock();

        let offset_val = self.offset.unwrap_or(0);
        let cardinality = input.num_rows() as u64;
        let limit_val = match self.limit {
            Some(0) => return Ok(SinkResultType::Finished),
            Some(limit) => limit,
            None => u64::MAX - offset_val,
        };
        let total_end = offset_val.saturating_add(limit_val);
        let returned_count = progress.returned_count;

        // example: offset=1000, limit=2, cardinality=100
        // start = 0.max(1000)-0 = 1000
        // end = (1000+2).min(0+100)-0 = 100
        // start(1000) > end(100), the whole chunk is skipped.
        let start = returned_count.max(offset_val) - returned_count;
        let end = total_end.min(returned_count + cardinality) - returned_count;
        progress.returned_count += cardinality;

        if start < end {
            let batch = if (start..end) == (0..cardinality) {
                input.clone()
            } else {
                input.slice(start as usize, (end - start) as usize)
            };
            progress.batches.push(batch);
        }

        if progress.returned_count >= total_end {
            Ok(SinkResultType::Finished)
        } else {
            Ok(SinkResultType::NeedMoreInput)
        }
    }

    fn combine(
        &self,
        _context: &ExecutionContext,
        _gstate: &dyn GlobalSinkState,
        _lstate: Box<dyn LocalSinkState>,
    ) -> Result<(), ExecutorError> {
        Ok(())
    }

    fn finalize(
        &self,
        _context: &ExecutionContext,
        _gstate: &dyn GlobalSinkState,
    ) -> Result<SinkFinalizeType, ExecutorError> {
        Ok(SinkFinalizeType::Ready)
    }
}

impl PipelineSource for PhysicalLimit {
    fn global_source_state(
        &self,
        _context: &ExecutionContext,
        input: Option<&GlobalSinkStateRef>,
    ) -> Result<GlobalSourceStateRef, ExecutorError> {
        let input = required_input(input, self.name())?;
        let sink_state = cast_global_sink_state_arc::<LimitGlobalState>(input)?;
        let batches = sink_state.progress.lock().batches.clone();
        Ok(Arc::new(MaterializedSourceState::new(batches)))
    }

    fn local_source_state(
        &self,
        _context: &ExecutionContext,
        _gstate: &dyn GlobalSourceState,
        _partition: Option<&PartitionDescriptor>,
    ) -> Result<Box<dyn LocalSourceState>, ExecutorError> {
        Ok(materialized_local_source_state())
    }

    fn get_data(
        &self,
        _context: &ExecutionContext,
        gstate: &dyn GlobalSourceState,
        lstate: &mut dyn LocalSourceState,
    ) -> Result<RecordBatch, ExecutorError> {
        materialized_get_data(self.schema(), gstate, lstate)
    }
}
