use std::sync::Arc;

use arrow::array::{ArrayRef, Int64Array};
use arrow::datatypes::{DataType, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parking_lot::Mutex;

use super::{
    cast_global_sink_state, cast_global_sink_state_arc, cast_local_sink_state,
    materialized_get_data, materialized_local_source_state, required_input,
    take_local_sink_state, GlobalSinkState, GlobalSinkStateRef, GlobalSourceState,
    GlobalSourceStateRef, LocalSinkState, LocalSourceState, MaterializedSourceState,
    PartitionDescriptor, PhysicalOperator, PhysicalOperatorBase, PhysicalOperatorRef,
    PipelineSink, PipelineSource, SinkFinalizeType, SinkResultType,
};
use crate::execution::{
    create_accumulators, merge_accumulators, update_accumulators, Accumulator, AccumulatorImpl,
    AggregateExpression, ExecutionContext, ExecutorError,
};

/// Aggregates without GROUP BY. Produces exactly one row, also for an empty input.
#[derive(Debug)]
pub struct PhysicalSimpleAggregate {
    pub(crate) base: PhysicalOperatorBase,
    pub(crate) aggregates: Vec<AggregateExpression>,
}

impl PhysicalSimpleAggregate {
    pub fn try_new(
        child: PhysicalOperatorRef,
        aggregates: Vec<AggregateExpression>,
    ) -> Result<Arc<Self>, ExecutorError> {
        validate_aggregate_inputs(&child.schema(), &aggregates)?;
        let fields = aggregates.iter().map(|agg| agg.field()).collect::<Vec<_>>();
        let base = PhysicalOperatorBase::new(vec![child], Arc::new(Schema::new(fields)));
        Ok(Arc::new(Self { base, aggregates }))
    }
}

/// Every aggregate input must be an Int64 column of the child.
pub(crate) fn validate_aggregate_inputs(
    schema: &SchemaRef,
    aggregates: &[AggregateExpression],
) -> Result<(), ExecutorError> {
    if aggregates.is_empty() {
        return Err(ExecutorError::OperatorError(
            "aggregate requires at least one aggregate expression".to_string(),
        ));
    }
    for agg in aggregates.iter() {
        if let Some(idx) = agg.column {
            validate_int64_column(schema, idx)?;
        }
    }
    Ok(())
}

pub(crate) fn validate_int64_column(schema: &SchemaRef, idx: usize) -> Result<(), ExecutorError> {
    let fields = schema.fields();
    match fields.get(idx) {
        Some(field) if field.data_type() == &DataType::Int64 => Ok(()),
        Some(field) => Err(ExecutorError::OperatorError(format!(
            "column {} has type {}, only Int64 is supported",
            field.name(),
            field.data_type()
        ))),
        None => Err(ExecutorError::OperatorError(format!(
            "column index {} is out of range, input has {} columns",
            idx,
            fields.len()
        ))),
    }
}

#[derive(Debug)]
pub struct SimpleAggregateGlobalState {
    accumulators: Mutex<Vec<AccumulatorImpl>>,
    result: Mutex<Option<RecordBatch>>,
}

impl GlobalSinkState for SimpleAggregateGlobalState {}

#[derive(Debug)]
pub struct SimpleAggregateLocalState {
    accumulators: Vec<AccumulatorImpl>,
}

impl LocalSinkState for SimpleAggregateLocalState {}

impl PhysicalOperator for PhysicalSimpleAggregate {
    fn name(&self) -> &str {
        "SimpleAggregate"
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

impl PipelineSink for PhysicalSimpleAggregate {
    fn global_sink_state(
        &self,
        _context: &ExecutionContext,
    ) -> Result<Arc<dyn GlobalSinkState>, ExecutorError> {
        Ok(Arc::new(SimpleAggregateGlobalState {
            accumulators: Mutex::new(create_accumulators(&self.aggregates)),
            result: Mutex::new(None),
        }))
    }

    fn local_sink_state(
        &self,
        _context: &ExecutionContext,
        _gstate: &dyn GlobalSinkState,
    ) -> Result<Box<dyn LocalSinkState>, ExecutorError> {
        Ok(Box::new(SimpleAggregateLocalState {
            accumulators: create_accumulators(&self.aggregates),
        }))
    }

    fn sink(
        &self,
        _context: &ExecutionContext,
        _gstate: &dyn GlobalSinkState,
        lstate: &mut dyn LocalSinkState,
        input: &RecordBatch,
    ) -> Result<SinkResultType, ExecutorError> {
        let lstate = cast_local_sink_state::<SimpleAggregateLocalState>(lstate)?;
        let inputs = self
            .aggregates
            .iter()
            .map(|agg| agg.input(input))
            .collect::<Result<Vec<_>, _>>()?;
        for row in 0..input.num_rows() {
            update_accumulators(&mut lstate.accumulators, &inputs, row)?;
        }
        Ok(SinkResultType::NeedMoreInput)
    }

    fn combine(
        &self,
        _context: &ExecutionContext,
        gstate: &dyn GlobalSinkState,
        lstate: Box<dyn LocalSinkState>,
    ) -> Result<(), ExecutorError> {
        let gstate = cast_global_sink_state::<SimpleAggregateGlobalState>(gstate)?;
        let lstate = take_local_sink_state::<SimpleAggregateLocalState>(lstate)?;
        let mut accumulators = gstate.accumulators.lock();
        merge_accumulators(&mut accumulators, &lstate.accumulators)
    }

    fn finalize(
        &self,
        _context: &ExecutionContext,
        gstate: &dyn GlobalSinkState,
    ) -> Result<SinkFinalizeType, ExecutorError> {
        let gstate = cast_global_sink_state::<SimpleAggregateGlobalState>(gstate)?;
        let columns = gstate
            .accumulators
            .lock()
            .iter()
            .map(|acc| -> Result<ArrayRef, ExecutorError> {
                Ok(Arc::new(Int64Array::from(vec![acc.evaluate()?])))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let batch = RecordBatch::try_new(self.schema(), columns)?;
        *gstate.result.lock() = Some(batch);
        Ok(SinkFinalizeType::Ready)
    }

    fn parallel_sink(&self) -> bool {
        true
    }
}

impl PipelineSource for PhysicalSimpleAggregate {
    fn global_source_state(
        &self,
        _context: &ExecutionContext,
        input: Option<&GlobalSinkStateRef>,
    ) -> Result<GlobalSourceStateRef, ExecutorError> {
        let input = required_input(input, self.name())?;
        let sink_state = cast_global_sink_state_arc::<SimpleAggregateGlobalState>(input)?;
        let batches = sink_state.result.lock().iter().cloned().collect::<Vec<_>>();
        Ok(Arc::new(MaterializedSourceState::new(batches)))
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
