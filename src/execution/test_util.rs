use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Int64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;

use crate::common::{as_int64_array, int64_value_at};
use crate::execution::*;
use crate::main_entry::{ClientContext, DatabaseConfig, DatabaseConfigBuilder, DatabaseInstance};
use crate::storage_v2::DataTable;

pub(crate) fn test_config(worker_threads: usize) -> DatabaseConfig {
    DatabaseConfigBuilder::default()
        .worker_threads(worker_threads)
        .build()
        .unwrap()
}

pub(crate) fn test_client_context(config: DatabaseConfig) -> Arc<ClientContext> {
    ClientContext::new(DatabaseInstance::new(config).unwrap())
}

pub(crate) fn test_execution_context() -> ExecutionContext {
    ExecutionContext::new(test_client_context(test_config(4)))
}

pub(crate) fn int64_schema(names: &[&str]) -> SchemaRef {
    let fields = names
        .iter()
        .map(|name| Field::new(name, DataType::Int64, true))
        .collect::<Vec<_>>();
    Arc::new(Schema::new(fields))
}

/// A batch of Int64 columns, all of the same length.
pub(crate) fn int64_batch(schema: SchemaRef, columns: Vec<Vec<Option<i64>>>) -> RecordBatch {
    let columns = columns
        .into_iter()
        .map(|values| Arc::new(Int64Array::from(values)) as ArrayRef)
        .collect::<Vec<_>>();
    RecordBatch::try_new(schema, columns).unwrap()
}

/// A table with the single column `v` holding `0..rows`.
pub(crate) fn int64_table(name: &str, rows: usize) -> Arc<DataTable> {
    let schema = int64_schema(&["v"]);
    let table = DataTable::new(name, schema.clone());
    if rows > 0 {
        let values = (0..rows as i64).map(Some).collect::<Vec<_>>();
        table.append(int64_batch(schema, vec![values])).unwrap();
    }
    table
}

pub(crate) fn table_scan_operator(table: Arc<DataTable>) -> PhysicalOperatorRef {
    PhysicalTableScan::new(table)
}

pub(crate) fn batches_operator(schema: SchemaRef, batches: Vec<RecordBatch>) -> PhysicalOperatorRef {
    PhysicalColumnDataScan::try_new(schema, batches).unwrap()
}

/// Filter on the first column, NULL never passes.
pub(crate) fn filter_operator(
    child: PhysicalOperatorRef,
    keep: impl Fn(i64) -> bool + Send + Sync + 'static,
) -> PhysicalOperatorRef {
    PhysicalFilter::new(
        child,
        Arc::new(move |batch: &RecordBatch| -> Result<BooleanArray, ExecutorError> {
            let values = as_int64_array(batch.column(0).as_ref())?;
            Ok((0..batch.num_rows())
                .map(|row| Some(int64_value_at(values, row).map_or(false, &keep)))
                .collect())
        }),
    )
}

/// All values of one Int64 column over a batch collection.
pub(crate) fn collect_int64(batches: &[RecordBatch], column: usize) -> Vec<Option<i64>> {
    batches
        .iter()
        .flat_map(|batch| {
            let values = as_int64_array(batch.column(column).as_ref()).unwrap();
            (0..batch.num_rows())
                .map(|row| int64_value_at(values, row))
                .collect::<Vec<_>>()
        })
        .collect()
}

#[derive(Debug, Default)]
pub(crate) struct SinkCounters {
    pub(crate) rows: AtomicUsize,
    pub(crate) combines: AtomicUsize,
    pub(crate) finalizes: AtomicUsize,
}

impl SinkCounters {
    pub(crate) fn rows(&self) -> usize {
        self.rows.load(Ordering::SeqCst)
    }

    pub(crate) fn combines(&self) -> usize {
        self.combines.load(Ordering::SeqCst)
    }

    pub(crate) fn finalizes(&self) -> usize {
        self.finalizes.load(Ordering::SeqCst)
    }
}

/// A pipeline breaker that only counts what reaches it and produces nothing.
#[derive(Debug)]
pub(crate) struct CountingSink {
    base: PhysicalOperatorBase,
    counters: Arc<SinkCounters>,
    parallel: bool,
}

impl CountingSink {
    pub(crate) fn new(child: PhysicalOperatorRef, parallel: bool) -> (Arc<Self>, Arc<SinkCounters>) {
        let counters = Arc::new(SinkCounters::default());
        let base = PhysicalOperatorBase::new(vec![child.clone()], child.schema());
        let sink = Arc::new(Self {
            base,
            counters: counters.clone(),
            parallel,
        });
        (sink, counters)
    }
}

#[derive(Debug)]
struct CountingGlobalState;

impl GlobalSinkState for CountingGlobalState {}

#[derive(Debug, Default)]
struct CountingLocalState {
    rows: usize,
}

impl LocalSinkState for CountingLocalState {}

impl PhysicalOperator for CountingSink {
    fn name(&self) -> &str {
        "CountingSink"
    }

    fn base(&self) -> &PhysicalOperatorBase {
        &self.base
    }

    fn into_source(self: Arc<Self>) -> Option<Arc<dyn PipelineSource>> {
        Some(self)
    }

    fn into_sink(self: Arc<Self>) -> Option<Arc<dyn PipelineSink>> {
        Some(self)
    }
}

impl PipelineSink for CountingSink {
    fn global_sink_state(
        &self,
        _context: &ExecutionContext,
    ) -> Result<Arc<dyn GlobalSinkState>, ExecutorError> {
        Ok(Arc::new(CountingGlobalState))
    }

    fn local_sink_state(
        &self,
        _context: &ExecutionContext,
        _gstate: &dyn GlobalSinkState,
    ) -> Result<Box<dyn LocalSinkState>, ExecutorError> {
        Ok(Box::new(CountingLocalState::default()))
    }

    fn sink(
        &self,
        _context: &ExecutionContext,
        _gstate: &dyn GlobalSinkState,
        lstate: &mut dyn LocalSinkState,
        input: &RecordBatch,
    ) -> Result<SinkResultType, ExecutorError> {
        cast_local_sink_state::<CountingLocalState>(lstate)?.rows += input.num_rows();
        Ok(SinkResultType::NeedMoreInput)
    }

    fn combine(
        &self,
        _context: &ExecutionContext,
        _gstate: &dyn GlobalSinkState,
        lstate: Box<dyn LocalSinkState>,
    ) -> Result<(), ExecutorError> {
        let lstate = take_local_sink_state::<CountingLocalState>(lstate)?;
        self.counters.rows.fetch_add(lstate.rows, Ordering::SeqCst);
        self.counters.combines.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn finalize(
        &self,
        _context: &ExecutionContext,
        _gstate: &dyn GlobalSinkState,
    ) -> Result<SinkFinalizeType, ExecutorError> {
        self.counters.finalizes.fetch_add(1, Ordering::SeqCst);
        Ok(SinkFinalizeType::Ready)
    }

    fn parallel_sink(&self) -> bool {
        self.parallel
    }
}

impl PipelineSource for CountingSink {
    fn global_source_state(
        &self,
        _context: &ExecutionContext,
        _input: Option<&GlobalSinkStateRef>,
    ) -> Result<GlobalSourceStateRef, ExecutorError> {
        Ok(Arc::new(MaterializedSourceState::new(vec![])))
    }

    fn local_source_state(
        &self,
        _context: &ExecutionContext,
        _gstate: &dyn GlobalSourceState,
        _partition: Option<&PartitionDescriptor>,
    ) -> Result<Box<dyn LocalSourceState>, ExecutorError> {
        Ok(materialized_local_source_state())
    }

    fn get_data(
        &self,
        _context: &ExecutionContext,
        gstate: &dyn GlobalSourceState,
        lstate: &mut dyn LocalSourceState,
    ) -> Result<RecordBatch, ExecutorError> {
        materialized_get_data(self.schema(), gstate, lstate)
    }
}
