use super::{merge_mismatch, Accumulator, AccumulatorImpl};
use crate::execution::ExecutorError;

// fold two nullable values with $OP, ignoring NULLs
macro_rules! min_max {
    ($OLD:expr, $NEW:expr, $OP:ident) => {{
        match ($OLD, $NEW) {
            (None, None) => None,
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (Some(a), Some(b)) => Some(a.$OP(b)),
        }
    }};
}

#[derive(Debug, Clone, Default)]
pub struct MinAccumulator {
    result: Option<i64>,
}

impl MinAccumulator {
    pub fn new() -> Self {
        Self { result: None }
    }
}

impl Accumulator for MinAccumulator {
    fn update(&mut self, value: Option<i64>) -> Result<(), ExecutorError> {
        self.result = min_max!(self.result, value, min);
        Ok(())
    }

    fn merge(&mut self, other: &AccumulatorImpl) -> Result<(), ExecutorError> {
        match other {
            AccumulatorImpl::MinAccumulator(other) => self.update(other.result),
            other => Err(merge_mismatch("MinAccumulator", other)),
        }
    }

    fn evaluate(&self) -> Result<Option<i64>, ExecutorError> {
        Ok(self.result)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MaxAccumulator {
    result: Option<i64>,
}

impl MaxAccumulator {
    pub fn new() -> Self {
        Self { result: None }
    }
}

impl Accumulator for MaxAccumulator {
    fn update(&mut self, value: Option<i64>) -> Result<(), ExecutorError> {
        self.result = min_max!(self.result, value, max);
        Ok(())
    }

    fn merge(&mut self, other: &AccumulatorImpl) -> Result<(), ExecutorError> {
        match other {
            AccumulatorImpl::MaxAccumulator(other) => self.update(other.result),
            other => Err(merge_mismatch("MaxAccumulator", other)),
        }
    }

    fn evaluate(&self) -> Result<Option<i64>, ExecutorError> {
        Ok(self.result)
    }
}
