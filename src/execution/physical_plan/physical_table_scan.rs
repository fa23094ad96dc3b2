use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use derive_new::new;

use super::{
    cast_local_source_state, GlobalSinkStateRef, GlobalSourceState, GlobalSourceStateRef,
    LocalSourceState, PartitionDescriptor, PhysicalOperator, PhysicalOperatorBase,
    PipelineSource, StatelessSourceState,
};
use crate::execution::{ExecutionContext, ExecutorError, VECTOR_SIZE};
use crate::storage_v2::DataTable;

/// Scans a local table. The scan is the only source that splits into row range partitions.
#[derive(Debug)]
pub struct PhysicalTableScan {
    pub(crate) base: PhysicalOperatorBase,
    pub(crate) table: Arc<DataTable>,
}

impl PhysicalTableScan {
    pub fn new(table: Arc<DataTable>) -> Arc<Self> {
        let base = PhysicalOperatorBase::new(vec![], table.schema());
        Arc::new(Self { base, table })
    }

    /// Cut `row_count` rows into at most `max_partitions` contiguous ranges of at least
    /// `min_rows` rows each. Returns nothing when a single range would cover the input.
    pub(crate) fn partition_ranges(
        row_count: usize,
        max_partitions: usize,
        min_rows: usize,
    ) -> Vec<PartitionDescriptor> {
        let min_rows = min_rows.max(1);
        let partition_count = max_partitions.min(row_count / min_rows);
        if partition_count <= 1 {
            return vec![];
        }
        let rows_per_partition = row_count / partition_count;
        let remainder = row_count % partition_count;
        let mut partitions = Vec::with_capacity(partition_count);
        let mut start = 0;
        for idx in 0..partition_count {
            // spread the remainder over the first partitions
            let len = rows_per_partition + usize::from(idx < remainder);
            partitions.push(PartitionDescriptor::new(idx, start..start + len));
            start += len;
        }
        partitions
    }
}

#[derive(new, Debug)]
pub struct TableScanLocalSourceState {
    next_row: usize,
    end_row: usize,
}

impl LocalSourceState for TableScanLocalSourceState {}

impl PhysicalOperator for PhysicalTableScan {
    fn name(&self) -> &str {
        "TableScan"
    }

    fn base(&self) -> &PhysicalOperatorBase {
        &self.base
    }

    fn into_source(self: Arc<Self>) -> Option<Arc<dyn PipelineSource>> {
        Some(self)
    }
}

impl PipelineSource for PhysicalTableScan {
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
        partition: Option<&PartitionDescriptor>,
    ) -> Result<Box<dyn LocalSourceState>, ExecutorError> {
        let row_count = self.table.row_count();
        let state = match partition {
            Some(partition) => {
                if partition.rows.end > row_count {
                    return Err(ExecutorError::InternalError(format!(
                        "partition {:?} exceeds table {} with {} rows",
                        partition,
                        self.table.name(),
                        row_count
                    )));
                }
                TableScanLocalSourceState::new(partition.rows.start, partition.rows.end)
            }
            None => TableScanLocalSourceState::new(0, row_count),
        };
        Ok(Box::new(state))
    }

    fn get_data(
        &self,
        _context: &ExecutionContext,
        _gstate: &dyn GlobalSourceState,
        lstate: &mut dyn LocalSourceState,
    ) -> Result<RecordBatch, ExecutorError> {
        let state = cast_local_source_state::<TableScanLocalSourceState>(lstate)?;
        if state.next_row >= state.end_row {
            return Ok(RecordBatch::new_empty(self.schema()));
        }
        let max_rows = (state.end_row - state.next_row).min(VECTOR_SIZE);
        match self.table.fetch_chunk(state.next_row, max_rows) {
            Some(chunk) => {
                state.next_row += chunk.num_rows();
                Ok(chunk)
            }
            None => {
                state.next_row = state.end_row;
                Ok(RecordBatch::new_empty(self.schema()))
            }
        }
    }

    fn parallel_source(&self) -> bool {
        true
    }

    fn try_partition(
        &self,
        context: &ExecutionContext,
        _gstate: &dyn GlobalSourceState,
        emit: &mut dyn FnMut(PartitionDescriptor),
    ) -> Result<(), ExecutorError> {
        let partitions = Self::partition_ranges(
            self.table.row_count(),
            context.max_partitions(),
            context.config().min_rows_per_partition,
        );
        partitions.into_iter().for_each(emit);
        Ok(())
    }
}
