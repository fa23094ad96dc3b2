mod pipeline;
mod pipeline_builder;
mod pipeline_event;
mod pipeline_executor;
mod pipeline_task;

pub use pipeline::*;
pub use pipeline_builder::*;
pub use pipeline_event::*;
pub use pipeline_executor::*;
pub use pipeline_task::*;
