use super::{merge_mismatch, Accumulator, AccumulatorImpl};
use crate::execution::ExecutorError;

/// Sums in `i128`, the Int64 range is only checked on the final value. Partial sums of the tasks
/// may leave it, as long as the whole sum fits.
#[derive(Debug, Clone, Default)]
pub struct SumAccumulator {
    result: Option<i128>,
}

impl SumAccumulator {
    pub fn new() -> Self {
        Self { result: None }
    }

    fn add(&mut self, delta: Option<i128>) -> Result<(), ExecutorError> {
        self.result = match (self.result, delta) {
            (None, None) => None,
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (Some(a), Some(b)) => Some(a.checked_add(b).ok_or_else(|| {
                ExecutorError::OperatorError("sum overflowed the Int128 range".to_string())
            })?),
        };
        Ok(())
    }
}

impl Accumulator for SumAccumulator {
    fn update(&mut self, value: Option<i64>) -> Result<(), ExecutorError> {
        self.add(value.map(i128::from))
    }

    fn merge(&mut self, other: &AccumulatorImpl) -> Result<(), ExecutorError> {
        match other {
            AccumulatorImpl::SumAccumulator(other) => self.add(other.result),
            other => Err(merge_mismatch("SumAccumulator", other)),
        }
    }

    fn evaluate(&self) -> Result<Option<i64>, ExecutorError> {
        self.result
            .map(|sum| {
                i64::try_from(sum).map_err(|_| {
                    ExecutorError::OperatorError(format!(
                        "sum {} overflowed the Int64 range",
                        sum
                    ))
                })
            })
            .transpose()
    }
}
