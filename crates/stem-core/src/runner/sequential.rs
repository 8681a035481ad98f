use std::sync::Arc;

use crate::meta::Meta;
use crate::output::{Inputs, Output};
use crate::reporter::TaskReporter;
use crate::tree::TaskNode;

use super::{default_reporter, dependency_meta, invoke, TaskRunner};

/// Depth-first execution on the calling thread
#[derive(Clone)]
pub struct SequentialRunner {
    reporter: Arc<dyn TaskReporter>,
}

impl SequentialRunner {
    pub fn new() -> Self {
        Self {
            reporter: default_reporter(),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn TaskReporter>) -> Self {
        self.reporter = reporter;
        self
    }
}

impl Default for SequentialRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRunner for SequentialRunner {
    fn run(&self, meta: &Meta, node: &Arc<TaskNode>) -> anyhow::Result<Output> {
        let mut inputs = Inputs::new();
        for dependency in node.dependencies() {
            let output = self.run(&dependency_meta(meta, dependency), dependency)?;
            inputs.insert(dependency.task().name(), output);
        }
        invoke(self.reporter.as_ref(), node, meta, inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::CollectingReporter;
    use crate::runner::testing::{arithmetic, node};
    use serde_json::json;

    #[test]
    fn test_runs_dependencies_depth_first() {
        let reporter = Arc::new(CollectingReporter::default());
        let runner = SequentialRunner::new().with_reporter(reporter.clone());
        let ws = arithmetic();

        let out = runner.run(&Meta::new(), &node(&ws, "total")).unwrap();
        assert_eq!(out.into_value(), json!(30));
        assert_eq!(
            reporter.completed(),
            vec!["numbers", "map_numbers", "reduce_map_numbers", "offset", "total"]
        );
    }

    #[test]
    fn test_leaf_node() {
        let ws = arithmetic();
        let meta = Meta::new().with("count", 2);
        let out = SequentialRunner::new()
            .run(&meta, &node(&ws, "numbers"))
            .unwrap();
        assert_eq!(out.into_value(), json!([1, 2]));
    }
}
