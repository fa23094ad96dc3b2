use arrow::record_batch::RecordBatch;
use derive_new::new;

use super::Pipeline;
use crate::execution::{
    ExecutionContext, ExecutorError, LocalSinkState, OperatorResultType, OperatorState,
    PartitionDescriptor, SinkResultType,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineExecuteResult {
    /// The source is exhausted, or the chain stopped early, and the sink state is combined
    Finished,
    /// The query was interrupted, nothing was combined
    Interrupted,
}

/// Drives the chunks of one task through a pipeline.
#[derive(new)]
pub struct PipelineExecutor<'a> {
    /// The pipeline to process
    pub(crate) pipeline: &'a Pipeline,
    /// The total execution context of this executor
    pub(crate) context: &'a ExecutionContext,
    /// The part of the source this task reads, `None` for the whole source
    pub(crate) partition: Option<&'a PartitionDescriptor>,
}

impl<'a> PipelineExecutor<'a> {
    pub fn execute(&self) -> Result<PipelineExecuteResult, ExecutorError> {
        if self.context.is_interrupted() {
            return Ok(PipelineExecuteResult::Interrupted);
        }

        let pipeline = self.pipeline;
        let source_state = pipeline.source_state()?;
        let mut source_local =
            pipeline
                .source
                .local_source_state(self.context, source_state.as_ref(), self.partition)?;
        let mut operator_states = pipeline
            .operators
            .iter()
            .map(|op| op.operator.operator_state(self.context, op.input.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        let mut sink_local = pipeline
            .sink
            .local_sink_state(self.context, pipeline.sink_state.as_ref())?;

        loop {
            if self.context.is_interrupted() {
                return Ok(PipelineExecuteResult::Interrupted);
            }
            let chunk =
                pipeline
                    .source
                    .get_data(self.context, source_state.as_ref(), source_local.as_mut())?;
            if chunk.num_rows() == 0 {
                break;
            }
            if !self.push(&mut operator_states, sink_local.as_mut(), &chunk, 0)? {
                break;
            }
        }

        pipeline
            .sink
            .combine(self.context, pipeline.sink_state.as_ref(), sink_local)?;
        Ok(PipelineExecuteResult::Finished)
    }

    /// Push `chunk` into the operator at `op_idx` and everything after it. Returns false once
    /// the chain can't take any more input.
    fn push(
        &self,
        operator_states: &mut [Box<dyn OperatorState>],
        sink_local: &mut dyn LocalSinkState,
        chunk: &RecordBatch,
        op_idx: usize,
    ) -> Result<bool, ExecutorError> {
        if chunk.num_rows() == 0 {
            return Ok(true);
        }
        let pipeline = self.pipeline;
        let operator = match pipeline.operators.get(op_idx) {
            Some(op) => &op.operator,
            None => {
                let result = pipeline.sink.sink(
                    self.context,
                    pipeline.sink_state.as_ref(),
                    sink_local,
                    chunk,
                )?;
                return Ok(result == SinkResultType::NeedMoreInput);
            }
        };

        loop {
            let (result, output) =
                operator.execute(self.context, operator_states[op_idx].as_mut(), chunk)?;
            if !self.push(operator_states, sink_local, &output, op_idx + 1)? {
                return Ok(false);
            }
            match result {
                // same input again, the operator has more output for it
                OperatorResultType::HaveMoreOutput => continue,
                OperatorResultType::NeedMoreInput => return Ok(true),
                OperatorResultType::Finished => return Ok(false),
            }
        }
    }
}
