use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arrow::record_batch::RecordBatch;
use futures::channel::oneshot;
use log::{debug, info, warn};
use parking_lot::Mutex;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

use crate::execution::{
    cast_global_sink_state_arc, ExecutionContext, ExecutorError, PhysicalOperatorRef,
    PhysicalResultCollector, Pipeline, PipelineBuilder, PipelineEvent, PipelineEventType,
    ProducerToken, ResultCollectorGlobalState, TaskScheduler,
};

/// Executes one query. The executor owns all pipelines of the query, schedules them once their
/// dependencies are finished, and collects the errors of their tasks.
pub struct Executor {
    context: Arc<ExecutionContext>,
    pipelines: Vec<Pipeline>,
    result: Arc<ResultCollectorGlobalState>,
    producer: ProducerToken,
    errors: Mutex<Vec<ExecutorError>>,
    completed_pipelines: AtomicUsize,
    completion_sender: Mutex<Option<oneshot::Sender<()>>>,
    completion_receiver: Mutex<Option<oneshot::Receiver<()>>>,
    events: Mutex<Vec<PipelineEvent>>,
    start_time: Instant,
}

impl Executor {
    /// Build the pipelines of `plan`, whose result is collected by the root pipeline.
    pub fn initialize(
        context: Arc<ExecutionContext>,
        plan: PhysicalOperatorRef,
    ) -> Result<Arc<Self>, ExecutorError> {
        let collector = PhysicalResultCollector::new(plan.clone());
        let pipelines = PipelineBuilder::new(&context).build(collector, plan)?;
        Self::verify_dependencies(&pipelines)?;

        let root = pipelines
            .last()
            .ok_or_else(|| ExecutorError::InternalError("query without pipelines".to_string()))?;
        let result = cast_global_sink_state_arc::<ResultCollectorGlobalState>(&root.sink_state)?;
        debug!("executor initialized with {} pipelines", pipelines.len());

        let producer = context.scheduler().create_producer();
        let (sender, receiver) = oneshot::channel();
        Ok(Arc::new(Self {
            context,
            pipelines,
            result,
            producer,
            errors: Mutex::new(vec![]),
            completed_pipelines: AtomicUsize::new(0),
            completion_sender: Mutex::new(Some(sender)),
            completion_receiver: Mutex::new(Some(receiver)),
            events: Mutex::new(vec![]),
            start_time: Instant::now(),
        }))
    }

    /// The dependency graph must be acyclic, otherwise some pipelines are never scheduled.
    fn verify_dependencies(pipelines: &[Pipeline]) -> Result<(), ExecutorError> {
        let mut graph = DiGraph::<usize, ()>::new();
        let nodes = pipelines
            .iter()
            .map(|p| graph.add_node(p.pipeline_id()))
            .collect::<Vec<_>>();
        for pipeline in pipelines.iter() {
            for dependency in pipeline.dependencies() {
                let child = nodes.get(*dependency).ok_or_else(|| {
                    ExecutorError::InternalError(format!(
                        "pipeline {} depends on unknown pipeline {}",
                        pipeline.pipeline_id(),
                        dependency
                    ))
                })?;
                graph.add_edge(*child, nodes[pipeline.pipeline_id()], ());
            }
        }
        toposort(&graph, None).map_err(|cycle| {
            ExecutorError::InternalError(format!(
                "pipeline {} is part of a dependency cycle",
                graph[cycle.node_id()]
            ))
        })?;
        Ok(())
    }

    /// Run the query to completion and return its result.
    pub fn run(self: &Arc<Self>) -> Result<Vec<RecordBatch>, ExecutorError> {
        let receiver = self.start()?;
        futures::executor::block_on(receiver).map_err(|_| {
            ExecutorError::InternalError("executor dropped before completion".to_string())
        })?;
        self.finish()
    }

    /// The awaitable variant of [`Executor::run`].
    pub async fn run_async(self: &Arc<Self>) -> Result<Vec<RecordBatch>, ExecutorError> {
        let receiver = self.start()?;
        receiver.await.map_err(|_| {
            ExecutorError::InternalError("executor dropped before completion".to_string())
        })?;
        self.finish()
    }

    /// Schedule every pipeline without dependencies, the others follow once those finish.
    fn start(self: &Arc<Self>) -> Result<oneshot::Receiver<()>, ExecutorError> {
        let receiver = self
            .completion_receiver
            .lock()
            .take()
            .ok_or_else(|| ExecutorError::InternalError("executor already ran".to_string()))?;
        for pipeline in self.pipelines.iter() {
            if pipeline.dependencies().is_empty() {
                if let Err(e) = pipeline.schedule(self) {
                    self.push_error(e);
                }
            }
        }
        Ok(receiver)
    }

    fn finish(&self) -> Result<Vec<RecordBatch>, ExecutorError> {
        let mut errors = std::mem::take(&mut *self.errors.lock()).into_iter();
        if let Some(first) = errors.next() {
            for other in errors {
                warn!("query failed with an additional error: {}", other);
            }
            warn!("query failed: {}", first);
            return Err(first);
        }
        if self.context.is_interrupted() {
            info!("query interrupted after {:?}", self.start_time.elapsed());
            return Err(ExecutorError::Interrupted);
        }
        info!(
            "query finished {} pipelines in {:?}",
            self.pipelines.len(),
            self.start_time.elapsed()
        );
        Ok(self.result.take_batches())
    }

    /// Record the error of a task. The first recorded error is the one the query fails with.
    pub fn push_error(&self, error: ExecutorError) {
        debug!("executor recorded error: {}", error);
        self.errors.lock().push(error);
    }

    pub fn has_error(&self) -> bool {
        !self.errors.lock().is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.errors.lock().len()
    }

    pub(crate) fn pipeline_completed(&self) {
        let completed = self.completed_pipelines.fetch_add(1, Ordering::SeqCst) + 1;
        if completed == self.pipelines.len() {
            if let Some(sender) = self.completion_sender.lock().take() {
                // the receiver is gone if the caller stopped waiting
                let _ = sender.send(());
            }
        }
    }

    pub fn completed_pipelines(&self) -> usize {
        self.completed_pipelines.load(Ordering::SeqCst)
    }

    pub fn pipelines(&self) -> &[Pipeline] {
        &self.pipelines
    }

    pub fn pipeline(&self, pipeline_id: usize) -> Option<&Pipeline> {
        self.pipelines.get(pipeline_id)
    }

    /// The pipeline feeding the result collector.
    pub fn root_pipeline(&self) -> &Pipeline {
        // the builder never returns an empty arena, checked in initialize
        &self.pipelines[self.pipelines.len() - 1]
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub(crate) fn scheduler(&self) -> &TaskScheduler {
        self.context.scheduler()
    }

    pub(crate) fn producer(&self) -> &ProducerToken {
        &self.producer
    }

    pub(crate) fn record_event(&self, pipeline_id: usize, event_type: PipelineEventType) {
        let event = PipelineEvent::new(pipeline_id, event_type, self.start_time.elapsed());
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use arrow::array::BooleanArray;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    use super::*;
    use crate::common::as_int64_array;
    use crate::execution::test_util::*;
    use crate::execution::{
        AggregateExpression, PhysicalFilter, PhysicalHashAggregate, PhysicalHashJoin,
        PhysicalSimpleAggregate, PipelineState, SinkFinalizeType, VECTOR_SIZE,
    };
    use crate::main_entry::{ClientContext, DatabaseConfig, DatabaseConfigBuilder};
    use crate::storage_v2::DataTable;

    fn partitioned_config(max_partitions: usize) -> DatabaseConfig {
        DatabaseConfigBuilder::default()
            .worker_threads(4)
            .max_partitions(Some(max_partitions))
            .min_rows_per_partition(VECTOR_SIZE)
            .build()
            .unwrap()
    }

    fn execution_context(client_context: &Arc<ClientContext>) -> Arc<ExecutionContext> {
        Arc::new(ExecutionContext::new(client_context.clone()))
    }

    fn assert_all_finished(executor: &Executor) {
        assert_eq!(executor.pipelines().len(), executor.completed_pipelines());
        for pipeline in executor.pipelines() {
            assert_eq!(PipelineState::Finished, pipeline.state());
            assert_eq!(pipeline.total_tasks(), Some(pipeline.finished_tasks()));
        }
    }

    #[test]
    fn test_error_in_one_partition() {
        let client_context = test_client_context(partitioned_config(4));
        let scan = table_scan_operator(int64_table("t", 4 * VECTOR_SIZE));
        let filter = PhysicalFilter::new(
            scan,
            Arc::new(|batch: &RecordBatch| -> Result<BooleanArray, ExecutorError> {
                let values = as_int64_array(batch.column(0).as_ref())?;
                if values.value(0) == 2 * VECTOR_SIZE as i64 {
                    return Err(ExecutorError::OperatorError("injected".to_string()));
                }
                Ok(BooleanArray::from(vec![true; batch.num_rows()]))
            }),
        );
        let (sink, counters) = CountingSink::new(filter, true);

        let executor = Executor::initialize(execution_context(&client_context), sink).unwrap();
        let result = executor.run();

        assert!(matches!(result, Err(ExecutorError::OperatorError(msg)) if msg == "injected"));
        assert_eq!(Some(4), executor.pipeline(0).unwrap().total_tasks());
        // the siblings of the failed task ran to completion
        assert_eq!(3, counters.combines());
        assert_eq!(3 * VECTOR_SIZE, counters.rows());
        // the query is failed, so the sink is never finalized
        assert_eq!(0, counters.finalizes());
        assert_eq!(Some(0), executor.root_pipeline().total_tasks());
        assert_all_finished(&executor);
    }

    #[test]
    fn test_finalize_runs_once() {
        let client_context = test_client_context(partitioned_config(8));
        let table = int64_table("t", 8 * VECTOR_SIZE);
        for _ in 0..50 {
            let scan = table_scan_operator(table.clone());
            // delay the tasks unevenly so they finish in racing order
            let filter = filter_operator(scan, |v| {
                if v % VECTOR_SIZE as i64 == 0 {
                    std::thread::sleep(Duration::from_micros(((v / 1024) % 3) as u64 * 200));
                }
                true
            });
            let (sink, counters) = CountingSink::new(filter, true);
            let executor =
                Executor::initialize(execution_context(&client_context), sink).unwrap();
            executor.run().unwrap();
            assert_eq!(1, counters.finalizes());
            assert_eq!(8, counters.combines());
            assert_eq!(8 * VECTOR_SIZE, counters.rows());
            assert_all_finished(&executor);
        }
    }

    #[test]
    fn test_dependencies_finish_before_parent_is_scheduled() {
        let client_context = test_client_context(test_config(4));
        let probe = PhysicalHashAggregate::try_new(
            table_scan_operator(int64_table("probe", 5000)),
            0,
            vec![AggregateExpression::count_star("c")],
        )
        .unwrap();
        let build = table_scan_operator(int64_table("build", 3000));
        let join = PhysicalHashJoin::try_new(probe, build, 0, 0).unwrap();

        let executor = Executor::initialize(execution_context(&client_context), join).unwrap();
        let result = executor.run().unwrap();
        assert_eq!(3000, result.iter().map(|b| b.num_rows()).sum::<usize>());

        let events = executor.events();
        let position = |pipeline_id: usize, event_type: PipelineEventType| {
            events
                .iter()
                .position(|e| e.pipeline_id == pipeline_id && e.event_type == event_type)
                .unwrap()
        };
        let root = executor.root_pipeline().pipeline_id();
        assert_eq!(vec![0, 1], executor.root_pipeline().dependencies().to_vec());
        let root_scheduled = position(root, PipelineEventType::Scheduled);
        assert!(position(0, PipelineEventType::Finished) < root_scheduled);
        assert!(position(1, PipelineEventType::Finished) < root_scheduled);
        assert_eq!(2 * executor.pipelines().len(), events.len());
        assert_all_finished(&executor);
    }

    #[test]
    fn test_interrupt_before_start() {
        let client_context = test_client_context(partitioned_config(4));
        let scan = table_scan_operator(int64_table("t", 4 * VECTOR_SIZE));
        let (sink, counters) = CountingSink::new(scan, true);
        let executor = Executor::initialize(execution_context(&client_context), sink).unwrap();

        client_context.interrupt();
        let result = executor.run();

        assert!(matches!(result, Err(ExecutorError::Interrupted)));
        assert_eq!(0, executor.error_count());
        assert_eq!(0, counters.rows());
        assert_eq!(0, counters.combines());
        assert_eq!(0, counters.finalizes());
        assert_all_finished(&executor);
    }

    #[test]
    fn test_empty_build_side_skips_probe() {
        let client_context = test_client_context(test_config(2));
        let probe = table_scan_operator(int64_table("probe", 100));
        let build = table_scan_operator(int64_table("build", 0));
        let join = PhysicalHashJoin::try_new(probe, build, 0, 0).unwrap();

        let executor = Executor::initialize(execution_context(&client_context), join).unwrap();
        let result = executor.run().unwrap();

        assert!(result.is_empty());
        assert_eq!(
            Some(SinkFinalizeType::NoOutputPossible),
            executor.pipeline(0).unwrap().finalize_type()
        );
        assert_eq!(Some(0), executor.root_pipeline().total_tasks());
        assert_all_finished(&executor);
    }

    #[test_case(1; "single partition")]
    #[test_case(3; "three partitions")]
    #[test_case(8; "eight partitions")]
    fn test_parallel_matches_sequential(max_partitions: usize) {
        let table = int64_table("t", 10_000);
        let plan = || {
            let scan = table_scan_operator(table.clone());
            let filter = filter_operator(scan, |v| v % 7 != 0);
            PhysicalSimpleAggregate::try_new(
                filter,
                vec![
                    AggregateExpression::count_star("c"),
                    AggregateExpression::sum(0, "s"),
                    AggregateExpression::min(0, "lo"),
                    AggregateExpression::max(0, "hi"),
                ],
            )
            .unwrap()
        };

        let sequential = test_client_context(
            DatabaseConfigBuilder::default()
                .worker_threads(1)
                .enable_parallelism(false)
                .build()
                .unwrap(),
        );
        let expected = Executor::initialize(execution_context(&sequential), plan())
            .unwrap()
            .run()
            .unwrap();

        let parallel = test_client_context(partitioned_config(max_partitions));
        let executor = Executor::initialize(execution_context(&parallel), plan()).unwrap();
        let actual = executor.run().unwrap();

        assert_eq!(Some(max_partitions.max(1)), executor.pipeline(0).unwrap().total_tasks());
        assert_eq!(expected, actual);
        assert_eq!(
            vec![Some(8571)],
            collect_int64(&actual, 0),
            "count of rows not divisible by 7"
        );
    }

    /// The three partitions of the table start with `i64::MAX`, `-1` and `1`, all other rows are 0.
    #[test_case(i64::MAX; "first partition combines last")]
    #[test_case(-1; "second partition combines last")]
    #[test_case(1; "third partition combines last")]
    fn test_parallel_sum_independent_of_combine_order(delayed: i64) {
        let schema = int64_schema(&["v"]);
        let mut values = vec![Some(0); 3 * VECTOR_SIZE];
        values[0] = Some(i64::MAX);
        values[VECTOR_SIZE] = Some(-1);
        values[2 * VECTOR_SIZE] = Some(1);
        let table = DataTable::new("t", schema.clone());
        table.append(int64_batch(schema, vec![values])).unwrap();

        let plan = || {
            let scan = table_scan_operator(table.clone());
            let filter = filter_operator(scan, move |v| {
                if v == delayed {
                    std::thread::sleep(Duration::from_millis(50));
                }
                true
            });
            PhysicalSimpleAggregate::try_new(filter, vec![AggregateExpression::sum(0, "s")])
                .unwrap()
        };

        let sequential = test_client_context(
            DatabaseConfigBuilder::default()
                .worker_threads(1)
                .enable_parallelism(false)
                .build()
                .unwrap(),
        );
        let expected = Executor::initialize(execution_context(&sequential), plan())
            .unwrap()
            .run()
            .unwrap();

        let parallel = test_client_context(partitioned_config(3));
        let executor = Executor::initialize(execution_context(&parallel), plan()).unwrap();
        let actual = executor.run().unwrap();

        assert_eq!(Some(3), executor.pipeline(0).unwrap().total_tasks());
        assert_eq!(expected, actual);
        assert_eq!(vec![Some(i64::MAX)], collect_int64(&actual, 0));
    }

    #[test]
    fn test_sum_overflow_fails_query() {
        let schema = int64_schema(&["v"]);
        let table = DataTable::new("t", schema.clone());
        table
            .append(int64_batch(schema, vec![vec![Some(i64::MAX), Some(1)]]))
            .unwrap();
        let client_context = test_client_context(test_config(2));
        let plan = PhysicalSimpleAggregate::try_new(
            table_scan_operator(table),
            vec![AggregateExpression::sum(0, "s")],
        )
        .unwrap();
        let executor = Executor::initialize(execution_context(&client_context), plan).unwrap();
        assert!(matches!(
            executor.run(),
            Err(ExecutorError::OperatorError(_))
        ));
        assert_all_finished(&executor);
    }

    #[test]
    fn test_run_twice() {
        let client_context = test_client_context(test_config(1));
        let scan = table_scan_operator(int64_table("t", 10));
        let executor = Executor::initialize(execution_context(&client_context), scan).unwrap();
        assert_eq!(10, executor.run().unwrap()[0].num_rows());
        assert!(matches!(
            executor.run(),
            Err(ExecutorError::InternalError(_))
        ));
    }

    #[test]
    fn test_total_tasks_set_once() {
        let client_context = test_client_context(test_config(1));
        let scan = table_scan_operator(int64_table("t", 10));
        let executor = Executor::initialize(execution_context(&client_context), scan).unwrap();
        let pipeline = executor.root_pipeline();
        pipeline.set_total_tasks(1).unwrap();
        assert!(pipeline.set_total_tasks(2).is_err());
        assert_eq!(Some(1), pipeline.total_tasks());
    }
}
