use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;

use super::{DatabaseError, DatabaseInstance, MaterializedQueryResult};
use crate::execution::{ExecutionContext, Executor, PhysicalOperatorRef};

/// The ClientContext holds information relevant to the current client session during execution
pub struct ClientContext {
    /// The database that this client is connected to
    pub(crate) db: Arc<DatabaseInstance>,
    pub(crate) interrupted: AtomicBool,
}

impl ClientContext {
    pub fn new(db: Arc<DatabaseInstance>) -> Arc<Self> {
        Arc::new(Self {
            db,
            interrupted: AtomicBool::new(false),
        })
    }

    /// Execute a physical plan and collect its whole result.
    pub async fn query(
        self: &Arc<Self>,
        plan: PhysicalOperatorRef,
    ) -> Result<MaterializedQueryResult, DatabaseError> {
        self.initial_cleanup();
        let schema = plan.schema();
        let context = Arc::new(ExecutionContext::new(self.clone()));
        let executor = Executor::initialize(context, plan)?;
        let collection = executor.run_async().await?;
        Ok(MaterializedQueryResult::new(schema, collection))
    }

    /// Ask the running query to stop, tasks observe it before pulling their next chunk.
    pub fn interrupt(&self) {
        debug!("client interrupted");
        self.interrupted.store(true, Ordering::Release);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    fn initial_cleanup(&self) {
        self.interrupted.store(false, Ordering::Release);
    }
}
