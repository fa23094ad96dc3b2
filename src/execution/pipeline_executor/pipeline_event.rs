use std::time::Duration;

use derive_new::new;
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PipelineEventType {
    Scheduled,
    Finished,
}

/// A state change of a pipeline, `elapsed` counts from the executor start.
#[derive(new, Debug, Clone, PartialEq, Eq)]
pub struct PipelineEvent {
    pub pipeline_id: usize,
    pub event_type: PipelineEventType,
    pub elapsed: Duration,
}
