use std::collections::HashMap;
use std::sync::Arc;

use ahash::RandomState;
use arrow::array::{ArrayRef, Int64Array};
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;
use itertools::Itertools;
use parking_lot::Mutex;

use super::{
    cast_global_sink_state, cast_global_sink_state_arc, cast_local_sink_state,
    materialized_get_data, materialized_local_source_state, required_input,
    take_local_sink_state, validate_aggregate_inputs, validate_int64_column, GlobalSinkState,
    GlobalSinkStateRef, GlobalSourceState, GlobalSourceStateRef, LocalSinkState,
    LocalSourceState, MaterializedSourceState, PartitionDescriptor, PhysicalOperator,
    PhysicalOperatorBase, PhysicalOperatorRef, PipelineSink, PipelineSource, SinkFinalizeType,
    SinkResultType,
};
use crate::common::{as_int64_array, int64_value_at};
use crate::execution::{
    create_accumulators, merge_accumulators, update_accumulators, Accumulator, AccumulatorImpl,
    AggregateExpression, ExecutionContext, ExecutorError, VECTOR_SIZE,
};

type GroupMap = HashMap<Option<i64>, Vec<AccumulatorImpl>, RandomState>;

/// Aggregates grouped by a single Int64 key column. NULL keys form their own group.
/// Groups are emitted ordered by key, NULL first.
#[derive(Debug)]
pub struct PhysicalHashAggregate {
    pub(crate) base: PhysicalOperatorBase,
    pub(crate) group_by: usize,
    pub(crate) aggregates: Vec<AggregateExpression>,
}

impl PhysicalHashAggregate {
    pub fn try_new(
        child: PhysicalOperatorRef,
        group_by: usize,
        aggregates: Vec<AggregateExpression>,
    ) -> Result<Arc<Self>, ExecutorError> {
        let child_schema = child.schema();
        validate_int64_column(&child_schema, group_by)?;
        validate_aggregate_inputs(&child_schema, &aggregates)?;
        let key_field = child_schema.field(group_by);
        let group_field = Field::new(key_field.name(), key_field.data_type().clone(), true);
        let fields = std::iter::once(group_field)
            .chain(aggregates.iter().map(|agg| agg.field()))
            .collect::<Vec<_>>();
        let base = PhysicalOperatorBase::new(vec![child], Arc::new(Schema::new(fields)));
        Ok(Arc::new(Self {
            base,
            group_by,
            aggregates,
        }))
    }

    fn new_groups() -> GroupMap {
        HashMap::with_hasher(RandomState::new())
    }

    /// Build the output chunks of the merged groups.
    fn build_batches(&self, groups: &GroupMap) -> Result<Vec<RecordBatch>, ExecutorError> {
        let sorted = groups
            .iter()
            .sorted_by_key(|(key, _)| **key)
            .collect::<Vec<_>>();
        sorted
            .chunks(VECTOR_SIZE)
            .map(|chunk| -> Result<RecordBatch, ExecutorError> {
                let keys = chunk.iter().map(|(key, _)| **key).collect::<Vec<_>>();
                let mut columns: Vec<ArrayRef> = vec![Arc::new(Int64Array::from(keys))];
                for idx in 0..self.aggregates.len() {
                    let values = chunk
                        .iter()
                        .map(|(_, accs)| accs[idx].evaluate())
                        .collect::<Result<Vec<_>, _>>()?;
                    columns.push(Arc::new(Int64Array::from(values)));
                }
                Ok(RecordBatch::try_new(self.schema(), columns)?)
            })
            .collect()
    }
}

#[derive(Debug)]
pub struct HashAggregateGlobalState {
    groups: Mutex<GroupMap>,
    result: Mutex<Vec<RecordBatch>>,
}

impl GlobalSinkState for HashAggregateGlobalState {}

#[derive(Debug)]
pub struct HashAggregateLocalState {
    groups: GroupMap,
}

impl LocalSinkState for HashAggregateLocalState {}

impl PhysicalOperator for PhysicalHashAggregate {
    fn name(&self) -> &str {
        "HashAggregate"
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

impl PipelineSink for PhysicalHashAggregate {
    fn global_sink_state(
        &self,
        _context: &ExecutionContext,
    ) -> Result<Arc<dyn GlobalSinkState>, ExecutorError> {
        Ok(Arc::new(HashAggregateGlobalState {
            groups: Mutex::new(Self::new_groups()),
            result: Mutex::new(vec![]),
        }))
    }

    fn local_sink_state(
        &self,
        _context: &ExecutionContext,
        _gstate: &dyn GlobalSinkState,
    ) -> Result<Box<dyn LocalSinkState>, ExecutorError> {
        Ok(Box::new(HashAggregateLocalState {
            groups: Self::new_groups(),
        }))
    }

    fn sink(
        &self,
        _context: &ExecutionContext,
        _gstate: &dyn GlobalSinkState,
        lstate: &mut dyn LocalSinkState,
        input: &RecordBatch,
    ) -> Result<SinkResultType, ExecutorError> {
        let lstate = cast_local_sink_state::<HashAggregateLocalState>(lstate)?;
        let keys = as_int64_array(input.column(self.group_by).as_ref())?;
        let inputs = self
            .aggregates
            .iter()
            .map(|agg| agg.input(input))
            .collect::<Result<Vec<_>, _>>()?;
        for row in 0..input.num_rows() {
            let accumulators = lstate
                .groups
                .entry(int64_value_at(keys, row))
                .or_insert_with(|| create_accumulators(&self.aggregates));
            update_accumulators(accumulators, &inputs, row)?;
        }
        Ok(SinkResultType::NeedMoreInput)
    }

    fn combine(
        &self,
        _context: &ExecutionContext,
        gstate: &dyn GlobalSinkState,
        lstate: Box<dyn LocalSinkState>,
    ) -> Result<(), ExecutorError> {
        let gstate = cast_global_sink_state::<HashAggregateGlobalState>(gstate)?;
        let lstate = take_local_sink_state::<HashAggregateLocalState>(lstate)?;
        let mut groups = gstate.groups.lock();
        for (key, accumulators) in lstate.groups {
            match groups.get_mut(&key) {
                Some(target) => merge_accumulators(target, &accumulators)?,
                None => {
                    groups.insert(key, accumulators);
                }
            }
        }
        Ok(())
    }

    fn finalize(
        &self,
        _context: &ExecutionContext,
        gstate: &dyn GlobalSinkState,
    ) -> Result<SinkFinalizeType, ExecutorError> {
        let gstate = cast_global_sink_state::<HashAggregateGlobalState>(gstate)?;
        let batches = self.build_batches(&gstate.groups.lock())?;
        *gstate.result.lock() = batches;
        Ok(SinkFinalizeType::Ready)
    }

    fn parallel_sink(&self) -> bool {
        true
    }
}

impl PipelineSource for PhysicalHashAggregate {
    fn global_source_state(
        &self,
        _context: &ExecutionContext,
        input: Option<&GlobalSinkStateRef>,
    ) -> Result<GlobalSourceStateRef, ExecutorError> {
        let input = required_input(input, self.name())?;
        let sink_state = cast_global_sink_state_arc::<HashAggregateGlobalState>(input)?;
        let batches = sink_state.result.lock().clone();
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

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::execution::test_util::*;

    #[test]
    fn test_combine_merges_groups_of_all_tasks() {
        let context = test_execution_context();
        let schema = int64_schema(&["k", "v"]);
        let child = batches_operator(schema.clone(), vec![]);
        let agg = PhysicalHashAggregate::try_new(
            child,
            0,
            vec![
                AggregateExpression::count_star("cnt"),
                AggregateExpression::sum(1, "total"),
            ],
        )
        .unwrap();
        let gstate = agg.global_sink_state(&context).unwrap();
        let inputs = vec![
            int64_batch(
                schema.clone(),
                vec![
                    vec![Some(2), Some(1), None],
                    vec![Some(10), Some(20), Some(30)],
                ],
            ),
            int64_batch(
                schema,
                vec![vec![Some(1), Some(2)], vec![Some(5), None]],
            ),
        ];
        for input in inputs.iter() {
            let mut lstate = agg.local_sink_state(&context, gstate.as_ref()).unwrap();
            agg.sink(&context, gstate.as_ref(), lstate.as_mut(), input)
                .unwrap();
            agg.combine(&context, gstate.as_ref(), lstate).unwrap();
        }
        agg.finalize(&context, gstate.as_ref()).unwrap();

        let source_state = agg.global_source_state(&context, Some(&gstate)).unwrap();
        let mut lstate = agg
            .local_source_state(&context, source_state.as_ref(), None)
            .unwrap();
        let output = agg
            .get_data(&context, source_state.as_ref(), lstate.as_mut())
            .unwrap();
        let output = [output];
        assert_eq!(vec![None, Some(1), Some(2)], collect_int64(&output, 0));
        assert_eq!(vec![Some(1), Some(2), Some(2)], collect_int64(&output, 1));
        assert_eq!(vec![Some(30), Some(25), Some(10)], collect_int64(&output, 2));
    }

    #[test]
    fn test_group_key_must_be_int64() {
        let schema = Arc::new(Schema::new(vec![Field::new(
            "s",
            arrow::datatypes::DataType::Utf8,
            true,
        )]));
        let child = batches_operator(schema, vec![]);
        let agg =
            PhysicalHashAggregate::try_new(child, 0, vec![AggregateExpression::count_star("c")]);
        assert!(agg.is_err());
    }
}
