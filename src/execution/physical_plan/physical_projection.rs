use std::sync::Arc;

use arrow::record_batch::RecordBatch;

use super::{
    GlobalSinkStateRef, OperatorResultType, OperatorState, PhysicalOperator,
    PhysicalOperatorBase, PhysicalOperatorRef, PipelineOperator, StatelessOperatorState,
};
use crate::execution::{ExecutionContext, ExecutorError};

/// Keeps the listed child columns, in the listed order.
#[derive(Debug)]
pub struct PhysicalProjection {
    pub(crate) base: PhysicalOperatorBase,
    pub(crate) projection: Vec<usize>,
}

impl PhysicalProjection {
    pub fn try_new(
        child: PhysicalOperatorRef,
        projection: Vec<usize>,
    ) -> Result<Arc<Self>, ExecutorError> {
        if projection.is_empty() {
            return Err(ExecutorError::OperatorError(
                "projection must keep at least one column".to_string(),
            ));
        }
        let schema = Arc::new(child.schema().project(&projection)?);
        let base = PhysicalOperatorBase::new(vec![child], schema);
        Ok(Arc::new(Self { base, projection }))
    }
}

impl PhysicalOperator for PhysicalProjection {
    fn name(&self) -> &str {
        "Projection"
    }

    fn base(&self) -> &PhysicalOperatorBase {
        &self.base
    }

    fn into_operator(self: Arc<Self>) -> Option<Arc<dyn PipelineOperator>> {
        Some(self)
    }
}

impl PipelineOperator for PhysicalProjection {
    fn operator_state(
        &self,
        _context: &ExecutionContext,
        _input: Option<&GlobalSinkStateRef>,
    ) -> Result<Box<dyn OperatorState>, ExecutorError> {
        Ok(Box::new(StatelessOperatorState))
    }

    fn execute(
        &self,
        _context: &ExecutionContext,
        _state: &mut dyn OperatorState,
        input: &RecordBatch,
    ) -> Result<(OperatorResultType, RecordBatch), ExecutorError> {
        let columns = self
            .projection
            .iter()
            .map(|idx| input.column(*idx).clone())
            .collect::<Vec<_>>();
        let output = RecordBatch::try_new(self.schema(), columns)?;
        Ok((OperatorResultType::NeedMoreInput, output))
    }

    fn parallel_operator(&self) -> bool {
        true
    }
}
