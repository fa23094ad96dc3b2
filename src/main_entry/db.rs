use std::sync::Arc;

use derive_builder::Builder;
use log::info;

use super::DatabaseError;
use crate::execution::{TaskScheduler, VECTOR_SIZE};

#[derive(Builder, Debug, Clone)]
pub struct DatabaseConfig {
    /// Number of worker threads of the task scheduler
    #[builder(default = "num_cpus::get()")]
    pub worker_threads: usize,
    /// Upper bound of partitions per source, the number of worker threads if unset
    #[builder(default = "None")]
    pub max_partitions: Option<usize>,
    /// Sources with fewer rows per partition than this are not split
    #[builder(default = "VECTOR_SIZE")]
    pub min_rows_per_partition: usize,
    #[builder(default = "true")]
    pub enable_parallelism: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
            max_partitions: None,
            min_rows_per_partition: VECTOR_SIZE,
            enable_parallelism: true,
        }
    }
}

/// The database owns the configuration and the task scheduler shared by all its clients.
#[derive(Debug)]
pub struct DatabaseInstance {
    pub(crate) config: DatabaseConfig,
    pub(crate) scheduler: TaskScheduler,
}

impl DatabaseInstance {
    pub fn new(config: DatabaseConfig) -> Result<Arc<Self>, DatabaseError> {
        let scheduler = TaskScheduler::try_new(config.worker_threads)?;
        info!(
            "database started with {} worker threads",
            scheduler.num_threads()
        );
        Ok(Arc::new(Self { config, scheduler }))
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// Stop accepting new tasks and wait for the running ones, later queries fail.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}
