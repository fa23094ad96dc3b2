use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use ahash::RandomState;
use arrow::array::{UInt32Array, UInt64Array};
use arrow::compute;
use arrow::compute::concat_batches;
use arrow::datatypes::{Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parking_lot::Mutex;

use super::{
    cast_global_sink_state, cast_global_sink_state_arc, cast_local_sink_state,
    cast_operator_state, required_input, take_local_sink_state, validate_int64_column,
    GlobalSinkState, GlobalSinkStateRef, LocalSinkState, OperatorResultType, OperatorState,
    PhysicalOperator, PhysicalOperatorBase, PhysicalOperatorRef, PipelineOperator, PipelineSink,
    SinkFinalizeType, SinkResultType,
};
use crate::common::{as_int64_array, int64_value_at};
use crate::execution::{ExecutionContext, ExecutorError, VECTOR_SIZE};

/// Inner equi-join on one Int64 key of each side. Children are `[probe, build]`: the join is the
/// sink of the pipeline over the build side, and a streaming operator in the pipeline over the
/// probe side. NULL keys never match.
#[derive(Debug)]
pub struct PhysicalHashJoin {
    pub(crate) base: PhysicalOperatorBase,
    pub(crate) probe_key: usize,
    pub(crate) build_key: usize,
}

impl PhysicalHashJoin {
    pub fn try_new(
        probe: PhysicalOperatorRef,
        build: PhysicalOperatorRef,
        probe_key: usize,
        build_key: usize,
    ) -> Result<Arc<Self>, ExecutorError> {
        let probe_schema = probe.schema();
        let build_schema = build.schema();
        validate_int64_column(&probe_schema, probe_key)?;
        validate_int64_column(&build_schema, build_key)?;
        let fields = probe_schema
            .fields()
            .iter()
            .chain(build_schema.fields().iter())
            .cloned()
            .collect::<Vec<_>>();
        let base = PhysicalOperatorBase::new(vec![probe, build], Arc::new(Schema::new(fields)));
        Ok(Arc::new(Self {
            base,
            probe_key,
            build_key,
        }))
    }

    fn build_schema(&self) -> SchemaRef {
        self.base.children[1].schema()
    }

    /// Collect the (probe row, build row) pairs of every match of `input`.
    fn probe(
        &self,
        table: &HashJoinHashTable,
        input: &RecordBatch,
    ) -> Result<(Vec<u64>, Vec<u32>), ExecutorError> {
        let keys = as_int64_array(input.column(self.probe_key).as_ref())?;
        let mut probe_indices = vec![];
        let mut build_indices = vec![];
        for row in 0..input.num_rows() {
            let matched = int64_value_at(keys, row).and_then(|key| table.rows.get(&key));
            if let Some(build_rows) = matched {
                for build_row in build_rows {
                    probe_indices.push(row as u64);
                    build_indices.push(*build_row);
                }
            }
        }
        Ok((probe_indices, build_indices))
    }
}

/// Build rows are addressed by `u32` in the hash table.
fn build_row_index(row: usize) -> Result<u32, ExecutorError> {
    u32::try_from(row).map_err(|_| {
        ExecutorError::OperatorError(format!(
            "hash join build side exceeds {} rows",
            u32::MAX
        ))
    })
}

fn build_batch(
    probe_batch: &RecordBatch,
    build_batch: &RecordBatch,
    probe_indices: &UInt64Array,
    build_indices: &UInt32Array,
    schema: SchemaRef,
) -> Result<RecordBatch, ExecutorError> {
    let probe_array: Vec<_> = probe_batch
        .columns()
        .iter()
        .map(|col| compute::take(col.as_ref(), probe_indices, None))
        .collect::<Result<_, _>>()?;
    let build_array: Vec<_> = build_batch
        .columns()
        .iter()
        .map(|col| compute::take(col.as_ref(), build_indices, None))
        .collect::<Result<_, _>>()?;

    let data = vec![probe_array, build_array].concat();
    Ok(RecordBatch::try_new(schema, data)?)
}

/// The hash table over the whole build side, available once the build pipeline is finalized.
#[derive(Debug)]
pub struct HashJoinHashTable {
    batch: RecordBatch,
    rows: HashMap<i64, Vec<u32>, RandomState>,
}

#[derive(Debug, Default)]
pub struct HashJoinGlobalState {
    batches: Mutex<Vec<RecordBatch>>,
    table: OnceLock<HashJoinHashTable>,
}

impl GlobalSinkState for HashJoinGlobalState {}

#[derive(Debug, Default)]
pub struct HashJoinLocalState {
    batches: Vec<RecordBatch>,
}

impl LocalSinkState for HashJoinLocalState {}

/// Probe progress of one task. Matches of a chunk are emitted `VECTOR_SIZE` pairs at a time.
#[derive(Debug)]
pub struct HashJoinProbeState {
    build: Arc<HashJoinGlobalState>,
    matches: Option<(Vec<u64>, Vec<u32>)>,
    emitted: usize,
}

impl OperatorState for HashJoinProbeState {}

impl PhysicalOperator for PhysicalHashJoin {
    fn name(&self) -> &str {
        "HashJoin"
    }

    fn base(&self) -> &PhysicalOperatorBase {
        &self.base
    }

    fn into_operator(self: Arc<Self>) -> Option<Arc<dyn PipelineOperator>> {
        Some(self)
    }

    fn into_sink(self: Arc<Self>) -> Option<Arc<dyn PipelineSink>> {
        Some(self)
    }
}

impl PipelineSink for PhysicalHashJoin {
    fn global_sink_state(
        &self,
        _context: &ExecutionContext,
    ) -> Result<Arc<dyn GlobalSinkState>, ExecutorError> {
        Ok(Arc::new(HashJoinGlobalState::default()))
    }

    fn local_sink_state(
        &self,
        _context: &ExecutionContext,
        _gstate: &dyn GlobalSinkState,
    ) -> Result<Box<dyn LocalSinkState>, ExecutorError> {
        Ok(Box::new(HashJoinLocalState::default()))
    }

    fn sink(
        &self,
        _context: &ExecutionContext,
        _gstate: &dyn GlobalSinkState,
        lstate: &mut dyn LocalSinkState,
        input: &RecordBatch,
    ) -> Result<SinkResultType, ExecutorError> {
        let lstate = cast_local_sink_state::<HashJoinLocalState>(lstate)?;
        lstate.batches.push(input.clone());
        Ok(SinkResultType::NeedMoreInput)
    }

    fn combine(
        &self,
        _context: &ExecutionContext,
        gstate: &dyn GlobalSinkState,
        lstate: Box<dyn LocalSinkState>,
    ) -> Result<(), ExecutorError> {
        let gstate = cast_global_sink_state::<HashJoinGlobalState>(gstate)?;
        let lstate = take_local_sink_state::<HashJoinLocalState>(lstate)?;
        gstate.batches.lock().extend(lstate.batches);
        Ok(())
    }

    /// Merge the build side into a single batch and index its rows by key.
    fn finalize(
        &self,
        _context: &ExecutionContext,
        gstate: &dyn GlobalSinkState,
    ) -> Result<SinkFinalizeType, ExecutorError> {
        let gstate = cast_global_sink_state::<HashJoinGlobalState>(gstate)?;
        let batches = std::mem::take(&mut *gstate.batches.lock());
        let batch = if batches.is_empty() {
            RecordBatch::new_empty(self.build_schema())
        } else {
            concat_batches(&self.build_schema(), &batches)?
        };
        let keys = as_int64_array(batch.column(self.build_key).as_ref())?;
        let mut rows: HashMap<i64, Vec<u32>, RandomState> =
            HashMap::with_hasher(RandomState::new());
        for row in 0..batch.num_rows() {
            if let Some(key) = int64_value_at(keys, row) {
                rows.entry(key)
                    .or_insert_with(Vec::new)
                    .push(build_row_index(row)?);
            }
        }
        let no_output = rows.is_empty();
        gstate
            .table
            .set(HashJoinHashTable { batch, rows })
            .map_err(|_| {
                ExecutorError::InternalError("hash join finalized twice".to_string())
            })?;
        if no_output {
            Ok(SinkFinalizeType::NoOutputPossible)
        } else {
            Ok(SinkFinalizeType::Ready)
        }
    }

    fn parallel_sink(&self) -> bool {
        true
    }
}

impl PipelineOperator for PhysicalHashJoin {
    fn operator_state(
        &self,
        _context: &ExecutionContext,
        input: Option<&GlobalSinkStateRef>,
    ) -> Result<Box<dyn OperatorState>, ExecutorError> {
        let input = required_input(input, self.name())?;
        let build = cast_global_sink_state_arc::<HashJoinGlobalState>(input)?;
        Ok(Box::new(HashJoinProbeState {
            build,
            matches: None,
            emitted: 0,
        }))
    }

    fn execute(
        &self,
        _context: &ExecutionContext,
        state: &mut dyn OperatorState,
        input: &RecordBatch,
    ) -> Result<(OperatorResultType, RecordBatch), ExecutorError> {
        let state = cast_operator_state::<HashJoinProbeState>(state)?;
        let table = state.build.table.get().ok_or_else(|| {
            ExecutorError::InternalError("hash join probed before its build side".to_string())
        })?;

        // a fresh input chunk, find all of its matches first
        let (probe_indices, build_indices) = match state.matches.take() {
            Some(matches) => matches,
            None => {
                state.emitted = 0;
                self.probe(table, input)?
            }
        };
        let start = state.emitted;
        let end = (start + VECTOR_SIZE).min(probe_indices.len());
        let output = build_batch(
            input,
            &table.batch,
            &UInt64Array::from(probe_indices[start..end].to_vec()),
            &UInt32Array::from(build_indices[start..end].to_vec()),
            self.schema(),
        )?;

        if end < probe_indices.len() {
            state.emitted = end;
            state.matches = Some((probe_indices, build_indices));
            Ok((OperatorResultType::HaveMoreOutput, output))
        } else {
            Ok((OperatorResultType::NeedMoreInput, output))
        }
    }

    fn parallel_operator(&self) -> bool {
        true
    }
}
