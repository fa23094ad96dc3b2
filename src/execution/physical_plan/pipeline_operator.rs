use std::sync::Arc;

use arrow::record_batch::RecordBatch;

use super::state::{GlobalSinkState, LocalSinkState};
use super::{
    GlobalSinkStateRef, GlobalSourceState, GlobalSourceStateRef, LocalSourceState,
    OperatorResultType, OperatorState, PartitionDescriptor, PhysicalOperator, SinkFinalizeType,
    SinkResultType,
};
use crate::execution::{ExecutionContext, ExecutorError};

pub trait PipelineSource: PhysicalOperator {
    /// Create the state shared by all tasks reading this source. Called when the pipeline is
    /// scheduled, `input` is the finalized sink state of the pipeline feeding this operator.
    fn global_source_state(
        &self,
        context: &ExecutionContext,
        input: Option<&GlobalSinkStateRef>,
    ) -> Result<GlobalSourceStateRef, ExecutorError>;

    /// Create the read position of one task. `partition` is `None` when the task reads the
    /// whole source.
    fn local_source_state(
        &self,
        context: &ExecutionContext,
        gstate: &dyn GlobalSourceState,
        partition: Option<&PartitionDescriptor>,
    ) -> Result<Box<dyn LocalSourceState>, ExecutorError>;

    /// Produce the next chunk, an empty chunk means the source is exhausted for this task.
    fn get_data(
        &self,
        context: &ExecutionContext,
        gstate: &dyn GlobalSourceState,
        lstate: &mut dyn LocalSourceState,
    ) -> Result<RecordBatch, ExecutorError>;

    fn parallel_source(&self) -> bool {
        false
    }

    /// Split the source into independent, non-overlapping partitions that cover the input
    /// exactly once. Emitting nothing means the source can't be parallelized right now.
    fn try_partition(
        &self,
        _context: &ExecutionContext,
        _gstate: &dyn GlobalSourceState,
        _emit: &mut dyn FnMut(PartitionDescriptor),
    ) -> Result<(), ExecutorError> {
        Ok(())
    }
}

pub trait PipelineOperator: PhysicalOperator {
    /// Create the per-task state. `input` is the finalized sink state this operator reads, if
    /// the operator is also the sink of another pipeline.
    fn operator_state(
        &self,
        context: &ExecutionContext,
        input: Option<&GlobalSinkStateRef>,
    ) -> Result<Box<dyn OperatorState>, ExecutorError>;

    fn execute(
        &self,
        context: &ExecutionContext,
        state: &mut dyn OperatorState,
        input: &RecordBatch,
    ) -> Result<(OperatorResultType, RecordBatch), ExecutorError>;

    /// Whether the operator can be shared by concurrently running tasks of one pipeline.
    fn parallel_operator(&self) -> bool {
        false
    }
}

pub trait PipelineSink: PhysicalOperator {
    fn global_sink_state(
        &self,
        context: &ExecutionContext,
    ) -> Result<Arc<dyn GlobalSinkState>, ExecutorError>;

    fn local_sink_state(
        &self,
        context: &ExecutionContext,
        gstate: &dyn GlobalSinkState,
    ) -> Result<Box<dyn LocalSinkState>, ExecutorError>;

    /// The sink method is called constantly with new input, as long as new input is available.
    /// Note that this method CAN be called in parallel, proper locking is needed when accessing
    /// data inside the GlobalSinkState.
    fn sink(
        &self,
        context: &ExecutionContext,
        gstate: &dyn GlobalSinkState,
        lstate: &mut dyn LocalSinkState,
        input: &RecordBatch,
    ) -> Result<SinkResultType, ExecutorError>;

    // The combine is called when a single thread has completed execution of its part of the
    // pipeline, it is the final time that a specific LocalSinkState is accessible. This method
    // can be called in parallel while other Sink() or Combine() calls are active on the same
    // GlobalSinkState.
    fn combine(
        &self,
        context: &ExecutionContext,
        gstate: &dyn GlobalSinkState,
        lstate: Box<dyn LocalSinkState>,
    ) -> Result<(), ExecutorError>;

    /// Called exactly once, after every task of the pipeline has combined.
    fn finalize(
        &self,
        context: &ExecutionContext,
        gstate: &dyn GlobalSinkState,
    ) -> Result<SinkFinalizeType, ExecutorError>;

    /// Whether task-local states can be combined in any order, which allows the pipeline to run
    /// with several tasks.
    fn parallel_sink(&self) -> bool {
        false
    }
}
