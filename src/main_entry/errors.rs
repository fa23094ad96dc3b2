use super::DatabaseConfigBuilderError;
use crate::execution::{ExecutorError, SchedulerError};

#[derive(thiserror::Error, Debug)]
pub enum DatabaseError {
    #[error("executor error: {0}")]
    ExecutorError(
        #[source]
        #[from]
        ExecutorError,
    ),
    #[error("scheduler error: {0}")]
    SchedulerError(
        #[source]
        #[from]
        SchedulerError,
    ),
    #[error("config error: {0}")]
    ConfigError(
        #[source]
        #[from]
        DatabaseConfigBuilderError,
    ),
}
