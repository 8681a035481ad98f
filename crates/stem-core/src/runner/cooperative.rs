use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::meta::Meta;
use crate::output::{Inputs, Output};
use crate::reporter::TaskReporter;
use crate::tree::TaskNode;

use super::{default_reporter, dependency_meta, invoke};

/// Single-threaded async execution; dependencies are awaited one at a time
#[derive(Clone)]
pub struct CooperativeRunner {
    reporter: Arc<dyn TaskReporter>,
}

impl CooperativeRunner {
    pub fn new() -> Self {
        Self {
            reporter: default_reporter(),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn TaskReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Execute `node`; each dependency is awaited before the next starts
    pub fn run<'a>(
        &'a self,
        meta: Meta,
        node: &'a Arc<TaskNode>,
    ) -> BoxFuture<'a, anyhow::Result<Output>> {
        async move {
            let mut inputs = Inputs::new();
            for dependency in node.dependencies() {
                let output = self.run(dependency_meta(&meta, dependency), dependency).await?;
                inputs.insert(dependency.task().name(), output);
            }
            invoke(self.reporter.as_ref(), node, &meta, inputs)
        }
        .boxed()
    }
}

impl Default for CooperativeRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::{arithmetic, node};
    use serde_json::json;

    #[tokio::test]
    async fn test_runs_inside_an_async_context() {
        let ws = arithmetic();
        let out = CooperativeRunner::new()
            .run(Meta::new(), &node(&ws, "total"))
            .await
            .unwrap();
        assert_eq!(out.into_value(), json!(30));
    }

    #[test]
    fn test_block_on() {
        let ws = arithmetic();
        let meta = Meta::new().with("count", 2);
        let runner = CooperativeRunner::new();
        let out = futures::executor::block_on(runner.run(meta, &node(&ws, "numbers"))).unwrap();
        assert_eq!(out.into_value(), json!([1, 2]));
    }
}
