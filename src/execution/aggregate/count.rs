use super::{merge_mismatch, Accumulator, AccumulatorImpl};
use crate::execution::ExecutorError;

#[derive(Debug, Clone, Default)]
pub struct CountAccumulator {
    result: i64,
}

impl CountAccumulator {
    pub fn new() -> Self {
        Self { result: 0 }
    }
}

impl Accumulator for CountAccumulator {
    fn update(&mut self, value: Option<i64>) -> Result<(), ExecutorError> {
        if value.is_some() {
            self.result += 1;
        }
        Ok(())
    }

    fn merge(&mut self, other: &AccumulatorImpl) -> Result<(), ExecutorError> {
        match other {
            AccumulatorImpl::CountAccumulator(other) => {
                self.result += other.result;
                Ok(())
            }
            other => Err(merge_mismatch("CountAccumulator", other)),
        }
    }

    fn evaluate(&self) -> Result<Option<i64>, ExecutorError> {
        Ok(Some(self.result))
    }
}
