use arrow::array::Int64Array;
use arrow::datatypes::{DataType, Field};
use arrow::record_batch::RecordBatch;
use derive_new::new;
use enum_dispatch::enum_dispatch;
use strum_macros::{AsRefStr, Display};

pub use self::count::CountAccumulator;
pub use self::min_max::{MaxAccumulator, MinAccumulator};
pub use self::sum::SumAccumulator;
use crate::common::{as_int64_array, int64_value_at};
use crate::execution::ExecutorError;

mod count;
mod min_max;
mod sum;

/// An accumulator represents a stateful object that lives throughout the evaluation of multiple
/// rows and generically accumulates values. Every task owns its own accumulators, which are merged
/// into the global ones when the task combines, so `merge` must be associative and commutative.
#[enum_dispatch]
pub trait Accumulator {
    /// Fold one input value into the state, `None` is a NULL input.
    fn update(&mut self, value: Option<i64>) -> Result<(), ExecutorError>;

    /// Merge the state of another accumulator of the same kind.
    fn merge(&mut self, other: &AccumulatorImpl) -> Result<(), ExecutorError>;

    /// returns its value based on its current state.
    fn evaluate(&self) -> Result<Option<i64>, ExecutorError>;
}

#[enum_dispatch(Accumulator)]
#[derive(Debug, Clone, AsRefStr)]
pub enum AccumulatorImpl {
    CountAccumulator,
    SumAccumulator,
    MinAccumulator,
    MaxAccumulator,
}

pub(crate) fn merge_mismatch(this: &str, other: &AccumulatorImpl) -> ExecutorError {
    ExecutorError::InternalError(format!(
        "can not merge {} into {}",
        other.as_ref(),
        this
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum AggregateFunction {
    #[strum(serialize = "count_star")]
    CountStar,
    #[strum(serialize = "count")]
    Count,
    #[strum(serialize = "sum")]
    Sum,
    #[strum(serialize = "min")]
    Min,
    #[strum(serialize = "max")]
    Max,
}

/// One aggregate over an Int64 input column, `column` is `None` only for `count(*)`.
#[derive(new, Debug, Clone)]
pub struct AggregateExpression {
    pub(crate) function: AggregateFunction,
    pub(crate) column: Option<usize>,
    pub(crate) alias: String,
}

impl AggregateExpression {
    pub fn count_star(alias: impl Into<String>) -> Self {
        Self::new(AggregateFunction::CountStar, None, alias.into())
    }

    pub fn count(column: usize, alias: impl Into<String>) -> Self {
        Self::new(AggregateFunction::Count, Some(column), alias.into())
    }

    pub fn sum(column: usize, alias: impl Into<String>) -> Self {
        Self::new(AggregateFunction::Sum, Some(column), alias.into())
    }

    pub fn min(column: usize, alias: impl Into<String>) -> Self {
        Self::new(AggregateFunction::Min, Some(column), alias.into())
    }

    pub fn max(column: usize, alias: impl Into<String>) -> Self {
        Self::new(AggregateFunction::Max, Some(column), alias.into())
    }

    pub fn create_accumulator(&self) -> AccumulatorImpl {
        match self.function {
            AggregateFunction::CountStar | AggregateFunction::Count => {
                CountAccumulator::new().into()
            }
            AggregateFunction::Sum => SumAccumulator::new().into(),
            AggregateFunction::Min => MinAccumulator::new().into(),
            AggregateFunction::Max => MaxAccumulator::new().into(),
        }
    }

    pub fn field(&self) -> Field {
        let nullable = !matches!(
            self.function,
            AggregateFunction::CountStar | AggregateFunction::Count
        );
        Field::new(&self.alias, DataType::Int64, nullable)
    }

    /// Resolve the input column of this aggregate in `batch`.
    pub(crate) fn input<'a>(
        &self,
        batch: &'a RecordBatch,
    ) -> Result<Option<&'a Int64Array>, ExecutorError> {
        match self.column {
            None => Ok(None),
            Some(idx) if idx < batch.num_columns() => {
                Ok(Some(as_int64_array(batch.column(idx).as_ref())?))
            }
            Some(idx) => Err(ExecutorError::OperatorError(format!(
                "{}({}) refers to a missing column, input has {} columns",
                self.function,
                idx,
                batch.num_columns()
            ))),
        }
    }
}

pub fn create_accumulators(exprs: &[AggregateExpression]) -> Vec<AccumulatorImpl> {
    exprs.iter().map(|e| e.create_accumulator()).collect()
}

/// Feed row `row` of the resolved inputs into the accumulators.
pub(crate) fn update_accumulators(
    accumulators: &mut [AccumulatorImpl],
    inputs: &[Option<&Int64Array>],
    row: usize,
) -> Result<(), ExecutorError> {
    for (acc, input) in accumulators.iter_mut().zip(inputs.iter()) {
        let value = match input {
            Some(array) => int64_value_at(array, row),
            // count(*) counts every row, whatever the value
            None => Some(0),
        };
        acc.update(value)?;
    }
    Ok(())
}

pub(crate) fn merge_accumulators(
    target: &mut [AccumulatorImpl],
    source: &[AccumulatorImpl],
) -> Result<(), ExecutorError> {
    if target.len() != source.len() {
        return Err(ExecutorError::InternalError(format!(
            "can not merge {} accumulators into {}",
            source.len(),
            target.len()
        )));
    }
    for (acc, other) in target.iter_mut().zip(source.iter()) {
        acc.merge(other)?;
    }
    Ok(())
}
