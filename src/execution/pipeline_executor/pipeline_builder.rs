use std::sync::Arc;

use log::debug;

use super::{Pipeline, PipelineChainOperator};
use crate::execution::{
    ExecutionContext, ExecutorError, GlobalSinkStateRef, PhysicalOperatorRef, PipelineSink,
    PipelineSource,
};

/// Cuts a physical plan into pipelines at every operator that is a sink. Child pipelines are
/// created before the pipelines depending on them, so the root pipeline is always the last one.
pub struct PipelineBuilder<'a> {
    context: &'a ExecutionContext,
    pipelines: Vec<Pipeline>,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(context: &'a ExecutionContext) -> Self {
        Self {
            context,
            pipelines: vec![],
        }
    }

    /// Build all pipelines of the plan below `sink`, the root sink of the query.
    pub fn build(
        mut self,
        sink: Arc<dyn PipelineSink>,
        plan: PhysicalOperatorRef,
    ) -> Result<Vec<Pipeline>, ExecutorError> {
        self.build_pipeline(sink, plan)?;
        Ok(self.pipelines)
    }

    /// Register that `parent` can only be scheduled once `child` finished.
    pub fn add_dependency(&mut self, parent: usize, child: usize) -> Result<(), ExecutorError> {
        if parent == child || parent >= self.pipelines.len() || child >= self.pipelines.len() {
            return Err(ExecutorError::InternalError(format!(
                "invalid pipeline dependency {} -> {}",
                parent, child
            )));
        }
        self.pipelines[parent].dependencies.push(child);
        self.pipelines[child].parents.push(parent);
        Ok(())
    }

    fn child_at(op: &PhysicalOperatorRef, idx: usize) -> Result<PhysicalOperatorRef, ExecutorError> {
        op.children().get(idx).cloned().ok_or_else(|| {
            ExecutorError::InternalError(format!("{} misses its child {}", op.name(), idx))
        })
    }

    /// Build the pipeline ending in `sink` whose input is `plan`, returns its id.
    fn build_pipeline(
        &mut self,
        sink: Arc<dyn PipelineSink>,
        plan: PhysicalOperatorRef,
    ) -> Result<usize, ExecutorError> {
        let sink_state = sink.global_sink_state(self.context)?;
        let mut operators = vec![];
        let mut child_pipelines = vec![];
        let mut current = plan;

        let (source, source_input): (Arc<dyn PipelineSource>, Option<GlobalSinkStateRef>) = loop {
            if let Some(source) = current.clone().into_source() {
                // a source that is a sink as well breaks the plan into two pipelines
                let source_input = match current.clone().into_sink() {
                    Some(child_sink) => {
                        let child = Self::child_at(&current, 0)?;
                        let child_id = self.build_pipeline(child_sink, child)?;
                        child_pipelines.push(child_id);
                        Some(self.pipelines[child_id].sink_state.clone())
                    }
                    None => None,
                };
                break (source, source_input);
            }

            if let Some(operator) = current.clone().into_operator() {
                // an operator that is a sink as well consumes its second child first
                let input = match current.clone().into_sink() {
                    Some(child_sink) => {
                        let child = Self::child_at(&current, 1)?;
                        let child_id = self.build_pipeline(child_sink, child)?;
                        child_pipelines.push(child_id);
                        Some(self.pipelines[child_id].sink_state.clone())
                    }
                    None => None,
                };
                operators.push(PipelineChainOperator { operator, input });
                current = Self::child_at(&current, 0)?;
                continue;
            }

            return Err(ExecutorError::InternalError(format!(
                "{} can't be placed in a pipeline",
                current.name()
            )));
        };

        // collected from the sink down to the source
        operators.reverse();
        let pipeline_id = self.pipelines.len();
        self.pipelines.push(Pipeline::new(
            pipeline_id,
            source,
            source_input,
            operators,
            sink,
            sink_state,
        ));
        for child_id in child_pipelines {
            self.add_dependency(pipeline_id, child_id)?;
        }
        debug!(
            "built pipeline {}: {}",
            pipeline_id, self.pipelines[pipeline_id]
        );
        Ok(pipeline_id)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::execution::test_util::*;
    use crate::execution::{
        AggregateExpression, PhysicalHashAggregate, PhysicalHashJoin, PhysicalLimit,
        PhysicalProjection, PhysicalResultCollector, PhysicalSimpleAggregate,
    };

    fn build(plan: PhysicalOperatorRef) -> Result<Vec<Pipeline>, ExecutorError> {
        let context = test_execution_context();
        let collector = PhysicalResultCollector::new(plan.clone());
        PipelineBuilder::new(&context).build(collector, plan)
    }

    #[test]
    fn test_single_pipeline() {
        let scan = table_scan_operator(int64_table("t", 10));
        let filter = filter_operator(scan, |v| v % 2 == 0);
        let plan = PhysicalProjection::try_new(filter, vec![0]).unwrap();
        let pipelines = build(plan).unwrap();
        assert_eq!(1, pipelines.len());
        assert_eq!(
            "TableScan -> Filter -> Projection -> ResultCollector",
            pipelines[0].to_string()
        );
        assert!(pipelines[0].dependencies().is_empty());
    }

    #[test]
    fn test_aggregate_breaks_pipeline() {
        let scan = table_scan_operator(int64_table("t", 10));
        let agg =
            PhysicalSimpleAggregate::try_new(scan, vec![AggregateExpression::count_star("c")])
                .unwrap();
        let plan = PhysicalLimit::new(agg, Some(1), None);
        let pipelines = build(plan).unwrap();
        let chains = pipelines.iter().map(|p| p.to_string()).collect::<Vec<_>>();
        assert_eq!(
            vec![
                "TableScan -> SimpleAggregate",
                "SimpleAggregate -> Limit",
                "Limit -> ResultCollector",
            ],
            chains
        );
        assert_eq!(vec![0], pipelines[1].dependencies().to_vec());
        assert_eq!(vec![1], pipelines[0].parents().to_vec());
        assert_eq!(vec![1], pipelines[2].dependencies().to_vec());
    }

    #[test]
    fn test_join_depends_on_build_and_probe_breaker() {
        let probe_table = int64_table("probe", 10);
        let build_table = int64_table("build", 10);
        let agg = PhysicalHashAggregate::try_new(
            table_scan_operator(probe_table),
            0,
            vec![AggregateExpression::count_star("c")],
        )
        .unwrap();
        let join =
            PhysicalHashJoin::try_new(agg, table_scan_operator(build_table), 0, 0).unwrap();
        let pipelines = build(join).unwrap();
        let chains = pipelines.iter().map(|p| p.to_string()).collect::<Vec<_>>();
        assert_eq!(
            vec![
                "TableScan -> HashJoin",
                "TableScan -> HashAggregate",
                "HashAggregate -> HashJoin -> ResultCollector",
            ],
            chains
        );
        assert_eq!(vec![0, 1], pipelines[2].dependencies().to_vec());
    }

    #[test]
    fn test_sink_inside_plan_is_rejected() {
        let scan = table_scan_operator(int64_table("t", 10));
        let plan = PhysicalResultCollector::new(scan);
        assert!(build(plan).is_err());
    }

    #[test]
    fn test_invalid_dependency() {
        let context = test_execution_context();
        let mut builder = PipelineBuilder::new(&context);
        assert!(builder.add_dependency(0, 1).is_err());
    }
}
