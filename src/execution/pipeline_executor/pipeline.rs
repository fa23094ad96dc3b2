use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use itertools::Itertools;
use log::{debug, trace};
use parking_lot::Mutex;
use strum_macros::Display;

use super::{PipelineEventType, PipelineTask};
use crate::execution::{
    ExecutionContext, Executor, ExecutorError, GlobalSinkStateRef, GlobalSourceStateRef,
    PartitionDescriptor, PipelineOperator, PipelineSink, PipelineSource, SinkFinalizeType,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PipelineState {
    Built,
    Scheduled,
    Running,
    Finalizing,
    Finished,
}

/// An operator of the chain together with the finalized sink state it reads, if any.
pub(crate) struct PipelineChainOperator {
    pub(crate) operator: Arc<dyn PipelineOperator>,
    pub(crate) input: Option<GlobalSinkStateRef>,
}

/// Query is divided into pipelines, Pipelines are executed in parallel.
///
/// Pipeline represents an execution pipeline, it gets data from `source` and pass it to `operators`
/// for immediate computation, and then pass data to `sink` for final computation.
///
/// Pipelines live in the arena of their [`Executor`] and refer to each other by index. A pipeline
/// is scheduled once all of its `dependencies` are finished, and notifies its `parents` when it
/// finishes itself.
pub struct Pipeline {
    pub(crate) pipeline_id: usize,
    /// The source of this pipeline
    pub(crate) source: Arc<dyn PipelineSource>,
    /// The finalized sink state feeding the source, for sources that are pipeline breakers
    pub(crate) source_input: Option<GlobalSinkStateRef>,
    /// The chain of intermediate operators
    pub(crate) operators: Vec<PipelineChainOperator>,
    /// The sink (i.e. destination) for data; this is e.g. a hash table to-be-built
    pub(crate) sink: Arc<dyn PipelineSink>,
    pub(crate) sink_state: GlobalSinkStateRef,

    /// The parent pipelines (i.e. pipelines that are dependent on this pipeline to finish)
    pub(crate) parents: Vec<usize>,
    /// The dependencies of this pipeline
    pub(crate) dependencies: Vec<usize>,

    state: Mutex<PipelineState>,
    source_state: OnceLock<GlobalSourceStateRef>,
    total_tasks: OnceLock<usize>,
    finished_tasks: AtomicUsize,
    finished_dependencies: AtomicUsize,
    /// Set when a dependency finalized without producing anything
    no_output_possible: AtomicBool,
    finalize_type: OnceLock<SinkFinalizeType>,
}

impl Pipeline {
    pub(crate) fn new(
        pipeline_id: usize,
        source: Arc<dyn PipelineSource>,
        source_input: Option<GlobalSinkStateRef>,
        operators: Vec<PipelineChainOperator>,
        sink: Arc<dyn PipelineSink>,
        sink_state: GlobalSinkStateRef,
    ) -> Self {
        Self {
            pipeline_id,
            source,
            source_input,
            operators,
            sink,
            sink_state,
            parents: vec![],
            dependencies: vec![],
            state: Mutex::new(PipelineState::Built),
            source_state: OnceLock::new(),
            total_tasks: OnceLock::new(),
            finished_tasks: AtomicUsize::new(0),
            finished_dependencies: AtomicUsize::new(0),
            no_output_possible: AtomicBool::new(false),
            finalize_type: OnceLock::new(),
        }
    }

    pub fn pipeline_id(&self) -> usize {
        self.pipeline_id
    }

    pub fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    pub fn total_tasks(&self) -> Option<usize> {
        self.total_tasks.get().copied()
    }

    pub fn finished_tasks(&self) -> usize {
        self.finished_tasks.load(Ordering::SeqCst)
    }

    pub fn parents(&self) -> &[usize] {
        &self.parents
    }

    pub fn dependencies(&self) -> &[usize] {
        &self.dependencies
    }

    /// The result of the sink finalize, once the pipeline is finished.
    pub fn finalize_type(&self) -> Option<SinkFinalizeType> {
        self.finalize_type.get().copied()
    }

    pub(crate) fn source_state(&self) -> Result<&GlobalSourceStateRef, ExecutorError> {
        self.source_state.get().ok_or_else(|| {
            ExecutorError::InternalError(format!(
                "pipeline {} runs before its source state is created",
                self.pipeline_id
            ))
        })
    }

    fn transition(&self, from: &[PipelineState], to: PipelineState) -> Result<(), ExecutorError> {
        let mut state = self.state.lock();
        if !from.contains(&*state) {
            return Err(ExecutorError::InternalError(format!(
                "pipeline {} can not go from {} to {}",
                self.pipeline_id, *state, to
            )));
        }
        trace!("pipeline {}: {} -> {}", self.pipeline_id, *state, to);
        *state = to;
        Ok(())
    }

    /// Fix the number of tasks of this pipeline, allowed exactly once.
    pub(crate) fn set_total_tasks(&self, total_tasks: usize) -> Result<(), ExecutorError> {
        self.total_tasks.set(total_tasks).map_err(|_| {
            ExecutorError::InternalError(format!(
                "total tasks of pipeline {} are already set",
                self.pipeline_id
            ))
        })
    }

    /// Whether every operator of the pipeline tolerates concurrent tasks feeding one sink.
    pub fn can_parallelize(&self, context: &ExecutionContext) -> bool {
        context.config().enable_parallelism
            && self.sink.parallel_sink()
            && self
                .operators
                .iter()
                .all(|op| op.operator.parallel_operator())
            && self.source.parallel_source()
    }

    /// Create the global source state and split the source into the partitions of the tasks.
    /// `None` is a single task reading the whole source.
    fn prepare(
        &self,
        context: &ExecutionContext,
    ) -> Result<Vec<Option<PartitionDescriptor>>, ExecutorError> {
        let gstate = self
            .source
            .global_source_state(context, self.source_input.as_ref())?;
        let gstate = self.source_state.get_or_init(|| gstate);

        let mut partitions = vec![];
        if self.can_parallelize(context) {
            self.source
                .try_partition(context, gstate.as_ref(), &mut |partition| {
                    partitions.push(Some(partition))
                })?;
        }
        if partitions.is_empty() {
            partitions.push(None);
        }
        Ok(partitions)
    }

    /// Submit the tasks of this pipeline. Called once all dependencies are finished.
    pub(crate) fn schedule(&self, executor: &Arc<Executor>) -> Result<(), ExecutorError> {
        self.transition(&[PipelineState::Built], PipelineState::Scheduled)?;
        executor.record_event(self.pipeline_id, PipelineEventType::Scheduled);

        if executor.has_error() || self.no_output_possible.load(Ordering::SeqCst) {
            debug!("pipeline {} is skipped", self.pipeline_id);
            return self.skip(executor);
        }

        let partitions = match self.prepare(executor.context()) {
            Ok(partitions) => partitions,
            Err(e) => {
                executor.push_error(e);
                return self.skip(executor);
            }
        };

        debug!(
            "pipeline {} [{}] scheduled with {} tasks",
            self.pipeline_id,
            self,
            partitions.len()
        );
        self.set_total_tasks(partitions.len())?;
        self.transition(&[PipelineState::Scheduled], PipelineState::Running)?;
        for partition in partitions {
            let task = PipelineTask::new(executor.clone(), self.pipeline_id, partition);
            if let Err(e) = executor
                .scheduler()
                .schedule_task(executor.producer(), Box::new(task))
            {
                // a rejected task still counts as finished, or the pipeline never completes
                executor.push_error(e.into());
                self.finish_task(executor);
            }
        }
        Ok(())
    }

    /// Schedule the pipeline without any task, it goes straight to finalize.
    fn skip(&self, executor: &Arc<Executor>) -> Result<(), ExecutorError> {
        self.set_total_tasks(0)?;
        self.finalize(executor)
    }

    /// Called by every task of this pipeline once it is done, whatever its outcome. The task
    /// completing the last one finalizes the pipeline.
    pub(crate) fn finish_task(&self, executor: &Arc<Executor>) {
        let finished = self.finished_tasks.fetch_add(1, Ordering::SeqCst) + 1;
        let total = match self.total_tasks() {
            Some(total) => total,
            None => {
                executor.push_error(ExecutorError::InternalError(format!(
                    "pipeline {} finished a task before it was scheduled",
                    self.pipeline_id
                )));
                return;
            }
        };
        trace!(
            "pipeline {} finished {}/{} tasks",
            self.pipeline_id,
            finished,
            total
        );
        if finished == total {
            if let Err(e) = self.finalize(executor) {
                executor.push_error(e);
            }
        } else if finished > total {
            executor.push_error(ExecutorError::InternalError(format!(
                "pipeline {} finished {} of {} tasks",
                self.pipeline_id, finished, total
            )));
        }
    }

    /// Finalize the sink, then resolve the dependency of every parent.
    pub(crate) fn finalize(&self, executor: &Arc<Executor>) -> Result<(), ExecutorError> {
        // only a pipeline without tasks finalizes right from Scheduled
        let from: &[PipelineState] = if self.total_tasks() == Some(0) {
            &[PipelineState::Scheduled]
        } else {
            &[PipelineState::Running]
        };
        self.transition(from, PipelineState::Finalizing)?;

        let context = executor.context();
        let finalize_type = if context.is_interrupted() || executor.has_error() {
            // the query result is failed anyway
            debug!("pipeline {} skips sink finalize", self.pipeline_id);
            SinkFinalizeType::NoOutputPossible
        } else {
            match self.sink.finalize(context, self.sink_state.as_ref()) {
                Ok(finalize_type) => finalize_type,
                Err(e) => {
                    executor.push_error(e);
                    SinkFinalizeType::NoOutputPossible
                }
            }
        };
        debug!(
            "pipeline {} finalized {}: {:?}",
            self.pipeline_id,
            self.sink.name(),
            finalize_type
        );
        // only this call sets it, the transition above guards against a second finalize
        let _ = self.finalize_type.set(finalize_type);

        self.transition(&[PipelineState::Finalizing], PipelineState::Finished)?;
        executor.record_event(self.pipeline_id, PipelineEventType::Finished);

        for parent in self.parents.iter() {
            if let Some(parent) = executor.pipeline(*parent) {
                parent.complete_dependency(executor, finalize_type);
            }
        }
        executor.pipeline_completed();
        Ok(())
    }

    /// One dependency of this pipeline finished, schedule it once all of them did.
    pub(crate) fn complete_dependency(
        &self,
        executor: &Arc<Executor>,
        finalize_type: SinkFinalizeType,
    ) {
        if finalize_type == SinkFinalizeType::NoOutputPossible {
            self.no_output_possible.store(true, Ordering::SeqCst);
        }
        let finished = self.finished_dependencies.fetch_add(1, Ordering::SeqCst) + 1;
        if finished == self.dependencies.len() {
            if let Err(e) = self.schedule(executor) {
                executor.push_error(e);
            }
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = std::iter::once(self.source.name())
            .chain(self.operators.iter().map(|op| op.operator.name()))
            .chain(std::iter::once(self.sink.name()));
        write!(f, "{}", names.join(" -> "))
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("pipeline_id", &self.pipeline_id)
            .field("chain", &self.to_string())
            .field("state", &self.state())
            .field("parents", &self.parents)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}
