use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use arrow::array::BooleanArray;
use arrow::compute::filter_record_batch;
use arrow::record_batch::RecordBatch;

use super::{
    GlobalSinkStateRef, OperatorResultType, OperatorState, PhysicalOperator,
    PhysicalOperatorBase, PhysicalOperatorRef, PipelineOperator, StatelessOperatorState,
};
use crate::execution::{ExecutionContext, ExecutorError};

/// Evaluates the filter condition of a chunk into a selection mask.
pub type FilterPredicate =
    Arc<dyn Fn(&RecordBatch) -> Result<BooleanArray, ExecutorError> + Send + Sync>;

pub struct PhysicalFilter {
    pub(crate) base: PhysicalOperatorBase,
    pub(crate) predicate: FilterPredicate,
}

impl PhysicalFilter {
    pub fn new(child: PhysicalOperatorRef, predicate: FilterPredicate) -> Arc<Self> {
        let base = PhysicalOperatorBase::new(vec![child.clone()], child.schema());
        Arc::new(Self { base, predicate })
    }
}

impl Debug for PhysicalFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalFilter")
            .field("base", &self.base)
            .finish()
    }
}

impl PhysicalOperator for PhysicalFilter {
    fn name(&self) -> &str {
        "Filter"
    }

    fn base(&self) -> &PhysicalOperatorBase {
        &self.base
    }

    fn into_operator(self: Arc<Self>) -> Option<Arc<dyn PipelineOperator>> {
        Some(self)
    }
}

impl PipelineOperator for PhysicalFilter {
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
        let predicate = (self.predicate)(input)?;
        if predicate.len() != input.num_rows() {
            return Err(ExecutorError::OperatorError(format!(
                "filter mask has {} rows, chunk has {}",
                predicate.len(),
                input.num_rows()
            )));
        }
        let output = filter_record_batch(input, &predicate)?;
        Ok((OperatorResultType::NeedMoreInput, output))
    }

    fn parallel_operator(&self) -> bool {
        true
    }
}
