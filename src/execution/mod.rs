mod aggregate;
mod executor;
mod physical_plan;
mod pipeline_executor;
mod task_scheduler;
#[cfg(test)]
pub(crate) mod test_util;

use std::sync::Arc;

pub use aggregate::*;
use arrow::error::ArrowError;
use derive_new::new;
pub use executor::*;
pub use physical_plan::*;
pub use pipeline_executor::*;
pub use task_scheduler::*;

use crate::main_entry::{ClientContext, DatabaseConfig};

/// Maximum number of rows in a single chunk flowing between operators.
pub const VECTOR_SIZE: usize = 1024;

/// The per-query view handed to every operator and task.
#[derive(new)]
pub struct ExecutionContext {
    pub(crate) client_context: Arc<ClientContext>,
}

impl ExecutionContext {
    pub fn clone_client_context(&self) -> Arc<ClientContext> {
        self.client_context.clone()
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.client_context.db.config
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.client_context.db.scheduler
    }

    pub fn is_interrupted(&self) -> bool {
        self.client_context.is_interrupted()
    }

    /// Upper bound of partitions a single source may split into.
    pub fn max_partitions(&self) -> usize {
        let config = self.config();
        config
            .max_partitions
            .unwrap_or_else(|| self.scheduler().num_threads())
            .max(1)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ExecutorError {
    #[error("arrow error: {0}")]
    ArrowError(
        #[source]
        #[from]
        ArrowError,
    ),
    #[error("operator error: {0}")]
    OperatorError(String),
    #[error("scheduler error: {0}")]
    SchedulerError(
        #[source]
        #[from]
        SchedulerError,
    ),
    #[error("query interrupted")]
    Interrupted,
    #[error("Executor internal error: {0}")]
    InternalError(String),
}
