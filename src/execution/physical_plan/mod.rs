mod physical_column_data_scan;
mod physical_filter;
mod physical_hash_aggregate;
mod physical_hash_join;
mod physical_limit;
mod physical_projection;
mod physical_result_collector;
mod physical_simple_aggregate;
mod physical_table_scan;
mod pipeline_operator;
mod result_type;
mod state;

use std::fmt::Debug;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use derive_new::new;
pub use physical_column_data_scan::*;
pub use physical_filter::*;
pub use physical_hash_aggregate::*;
pub use physical_hash_join::*;
pub use physical_limit::*;
pub use physical_projection::*;
pub use physical_result_collector::*;
pub use physical_simple_aggregate::*;
pub use physical_table_scan::*;
pub use pipeline_operator::*;
pub use result_type::*;
pub use state::*;

pub type PhysicalOperatorRef = Arc<dyn PhysicalOperator>;

#[derive(new, Debug, Clone)]
pub struct PhysicalOperatorBase {
    pub(crate) children: Vec<PhysicalOperatorRef>,
    /// The schema of the chunks this operator produces
    pub(crate) schema: SchemaRef,
}

/// The common trait over all physical operators. An operator announces the roles it can play in
/// a pipeline through the `into_*` capability queries, which the pipeline builder uses to cut the
/// plan into pipelines.
pub trait PhysicalOperator: Debug + Send + Sync {
    fn name(&self) -> &str;

    fn base(&self) -> &PhysicalOperatorBase;

    fn children(&self) -> &[PhysicalOperatorRef] {
        &self.base().children
    }

    fn schema(&self) -> SchemaRef {
        self.base().schema.clone()
    }

    fn into_source(self: Arc<Self>) -> Option<Arc<dyn PipelineSource>> {
        None
    }

    fn into_operator(self: Arc<Self>) -> Option<Arc<dyn PipelineOperator>> {
        None
    }

    fn into_sink(self: Arc<Self>) -> Option<Arc<dyn PipelineSink>> {
        None
    }
}
