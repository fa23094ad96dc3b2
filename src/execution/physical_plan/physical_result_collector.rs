use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use parking_lot::Mutex;

use super::{
    cast_global_sink_state, cast_local_sink_state, take_local_sink_state, GlobalSinkState,
    LocalSinkState, PhysicalOperator, PhysicalOperatorBase, PhysicalOperatorRef, PipelineSink,
    SinkFinalizeType, SinkResultType,
};
use crate::execution::{ExecutionContext, ExecutorError};

/// The root sink of every query, collects the result chunks in the order they arrive.
#[derive(Debug)]
pub struct PhysicalResultCollector {
    pub(crate) base: PhysicalOperatorBase,
}

impl PhysicalResultCollector {
    pub fn new(child: PhysicalOperatorRef) -> Arc<Self> {
        let base = PhysicalOperatorBase::new(vec![child.clone()], child.schema());
        Arc::new(Self { base })
    }
}

#[derive(Debug, Default)]
pub struct ResultCollectorGlobalState {
    batches: Mutex<Vec<RecordBatch>>,
}

impl ResultCollectorGlobalState {
    pub fn take_batches(&self) -> Vec<RecordBatch> {
        std::mem::take(&mut *self.batches.lock())
    }
}

impl GlobalSinkState for ResultCollectorGlobalState {}

#[derive(Debug, Default)]
pub struct ResultCollectorLocalState {
    batches: Vec<RecordBatch>,
}

impl LocalSinkState for ResultCollectorLocalState {}

impl PhysicalOperator for PhysicalResultCollector {
    fn name(&self) -> &str {
        "ResultCollector"
    }

    fn base(&self) -> &PhysicalOperatorBase {
        &self.base
    }

    fn into_sink(self: Arc<Self>) -> Option<Arc<dyn PipelineSink>> {
        Some(self)
    }
}

impl PipelineSink for PhysicalResultCollector {
    fn global_sink_state(
        &self,
        _context: &ExecutionContext,
    ) -> Result<Arc<dyn GlobalSinkState>, ExecutorError> {
        Ok(Arc::new(ResultCollectorGlobalState::default()))
    }

    fn local_sink_state(
        &self,
        _context: &ExecutionContext,
        _gstate: &dyn GlobalSinkState,
    ) -> Result<Box<dyn LocalSinkState>, ExecutorError> {
        Ok(Box::new(ResultCollectorLocalState::default()))
    }

    fn sink(
        &self,
        _context: &ExecutionContext,
        _gstate: &dyn GlobalSinkState,
        lstate: &mut dyn LocalSinkState,
        input: &RecordBatch,
    ) -> Result<SinkResultType, ExecutorError> {
        let lstate = cast_local_sink_state::<ResultCollectorLocalState>(lstate)?;
        lstate.batches.push(input.clone());
        Ok(SinkResultType::NeedMoreInput)
    }

    fn combine(
        &self,
        _context: &ExecutionContext,
        gstate: &dyn GlobalSinkState,
        lstate: Box<dyn LocalSinkState>,
    ) -> Result<(), ExecutorError> {
        let gstate = cast_global_sink_state::<ResultCollectorGlobalState>(gstate)?;
        let lstate = take_local_sink_state::<ResultCollectorLocalState>(lstate)?;
        gstate.batches.lock().extend(lstate.batches);
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
