use std::any::type_name;
use std::ops::Range;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use derive_new::new;
use downcast_rs::{impl_downcast, Downcast, DowncastSync};

use crate::execution::ExecutorError;

/// Task-local state of a regular operator.
pub trait OperatorState: Downcast + Send {}
impl_downcast!(OperatorState);

/// State shared by all tasks sinking into the same operator. `sink` and `combine` can be called
/// in parallel, so implementations must synchronize their own mutable parts.
pub trait GlobalSinkState: DowncastSync {}
impl_downcast!(sync GlobalSinkState);

pub type GlobalSinkStateRef = Arc<dyn GlobalSinkState>;

/// Task-local sink state, merged into the global state by `combine`.
pub trait LocalSinkState: Downcast + Send {}
impl_downcast!(LocalSinkState);

/// State shared by all tasks reading from the same source.
pub trait GlobalSourceState: DowncastSync {}
impl_downcast!(sync GlobalSourceState);

pub type GlobalSourceStateRef = Arc<dyn GlobalSourceState>;

/// Task-local read position of a source.
pub trait LocalSourceState: Downcast + Send {}
impl_downcast!(LocalSourceState);

/// Operators without any per-task state use this one.
#[derive(Debug, Default)]
pub struct StatelessOperatorState;

impl OperatorState for StatelessOperatorState {}

/// Sources without any shared state use this one.
#[derive(Debug, Default)]
pub struct StatelessSourceState;

impl GlobalSourceState for StatelessSourceState {}

/// Describes the slice of a source assigned to one task. Only the source that emitted the
/// descriptor interprets it.
#[derive(new, Debug, Clone, PartialEq, Eq)]
pub struct PartitionDescriptor {
    pub partition_idx: usize,
    pub rows: Range<usize>,
}

fn unexpected_state<T>() -> ExecutorError {
    ExecutorError::InternalError(format!("unexpected state type, expected {}", type_name::<T>()))
}

pub(crate) fn cast_operator_state<T: OperatorState>(
    state: &mut dyn OperatorState,
) -> Result<&mut T, ExecutorError> {
    state.downcast_mut::<T>().ok_or_else(unexpected_state::<T>)
}

pub(crate) fn cast_global_sink_state<T: GlobalSinkState>(
    state: &dyn GlobalSinkState,
) -> Result<&T, ExecutorError> {
    state.downcast_ref::<T>().ok_or_else(unexpected_state::<T>)
}

pub(crate) fn cast_global_sink_state_arc<T: GlobalSinkState>(
    state: &GlobalSinkStateRef,
) -> Result<Arc<T>, ExecutorError> {
    state
        .clone()
        .downcast_arc::<T>()
        .map_err(|_| unexpected_state::<T>())
}

pub(crate) fn cast_local_sink_state<T: LocalSinkState>(
    state: &mut dyn LocalSinkState,
) -> Result<&mut T, ExecutorError> {
    state.downcast_mut::<T>().ok_or_else(unexpected_state::<T>)
}

pub(crate) fn take_local_sink_state<T: LocalSinkState>(
    state: Box<dyn LocalSinkState>,
) -> Result<Box<T>, ExecutorError> {
    state.downcast::<T>().map_err(|_| unexpected_state::<T>())
}

pub(crate) fn cast_global_source_state<T: GlobalSourceState>(
    state: &dyn GlobalSourceState,
) -> Result<&T, ExecutorError> {
    state.downcast_ref::<T>().ok_or_else(unexpected_state::<T>)
}

pub(crate) fn cast_local_source_state<T: LocalSourceState>(
    state: &mut dyn LocalSourceState,
) -> Result<&mut T, ExecutorError> {
    state.downcast_mut::<T>().ok_or_else(unexpected_state::<T>)
}

/// The sink state feeding an operator, required once the pipeline that produces it is finalized.
pub(crate) fn required_input<'a>(
    input: Option<&'a GlobalSinkStateRef>,
    operator: &str,
) -> Result<&'a GlobalSinkStateRef, ExecutorError> {
    input.ok_or_else(|| {
        ExecutorError::InternalError(format!("{} requires the state of its child sink", operator))
    })
}

/// Source state of operators whose finalized sink output is already materialized, like
/// aggregates and limits.
#[derive(new, Debug)]
pub struct MaterializedSourceState {
    pub(crate) batches: Vec<RecordBatch>,
}

impl GlobalSourceState for MaterializedSourceState {}

#[derive(Debug, Default)]
pub struct MaterializedLocalSourceState {
    next_batch: usize,
}

impl LocalSourceState for MaterializedLocalSourceState {}

pub(crate) fn materialized_local_source_state() -> Box<dyn LocalSourceState> {
    Box::new(MaterializedLocalSourceState::default())
}

/// Hand out the materialized batches one by one, then an empty chunk.
pub(crate) fn materialized_get_data(
    schema: SchemaRef,
    gstate: &dyn GlobalSourceState,
    lstate: &mut dyn LocalSourceState,
) -> Result<RecordBatch, ExecutorError> {
    let gstate = cast_global_source_state::<MaterializedSourceState>(gstate)?;
    let lstate = cast_local_source_state::<MaterializedLocalSourceState>(lstate)?;
    match gstate.batches.get(lstate.next_batch) {
        Some(batch) => {
            lstate.next_batch += 1;
            Ok(batch.clone())
        }
        None => Ok(RecordBatch::new_empty(schema)),
    }
}
