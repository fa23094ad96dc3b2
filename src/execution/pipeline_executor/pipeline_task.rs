use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use derive_new::new;
use log::trace;

use super::{PipelineExecuteResult, PipelineExecutor};
use crate::execution::{Executor, ExecutorError, PartitionDescriptor, Task};

/// Executes one partition of a pipeline on a worker thread.
#[derive(new)]
pub struct PipelineTask {
    executor: Arc<Executor>,
    pipeline_id: usize,
    partition: Option<PartitionDescriptor>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Task for PipelineTask {
    fn execute(self: Box<Self>) {
        let executor = &self.executor;
        let pipeline = match executor.pipeline(self.pipeline_id) {
            Some(pipeline) => pipeline,
            None => {
                // tasks are only created by `Pipeline::schedule` with its own id, an unknown id
                // has no task count to finish and fails the query instead
                executor.push_error(ExecutorError::InternalError(format!(
                    "task of unknown pipeline {}",
                    self.pipeline_id
                )));
                return;
            }
        };
        trace!(
            "pipeline {} task {:?} started",
            self.pipeline_id,
            self.partition
        );

        let pipeline_executor =
            PipelineExecutor::new(pipeline, executor.context(), self.partition.as_ref());
        // errors stay inside the task, siblings keep running
        match catch_unwind(AssertUnwindSafe(|| pipeline_executor.execute())) {
            Ok(Ok(PipelineExecuteResult::Finished)) => {
                trace!("pipeline {} task finished", self.pipeline_id)
            }
            Ok(Ok(PipelineExecuteResult::Interrupted)) => {
                trace!("pipeline {} task interrupted", self.pipeline_id)
            }
            Ok(Err(e)) => executor.push_error(e),
            Err(payload) => executor.push_error(ExecutorError::OperatorError(format!(
                "task of pipeline {} panicked: {}",
                self.pipeline_id,
                panic_message(payload.as_ref())
            ))),
        }

        pipeline.finish_task(executor);
    }
}
