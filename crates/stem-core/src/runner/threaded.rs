use std::sync::Arc;

use anyhow::Context;
use rayon::prelude::*;
use tracing::trace;

use crate::meta::Meta;
use crate::output::{Inputs, Output};
use crate::reporter::TaskReporter;
use crate::tree::TaskNode;

use super::{default_reporter, dependency_meta, invoke, TaskRunner};

/// Default upper bound on worker threads per node
pub const DEFAULT_THREADS: usize = 5;

/// Runs the dependencies of each node concurrently on a bounded thread pool.
///
/// Every node with more than one dependency gets its own pool; pools are
/// never shared between nodes.
#[derive(Clone)]
pub struct ThreadedRunner {
    threads: usize,
    reporter: Arc<dyn TaskReporter>,
}

impl ThreadedRunner {
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
            reporter: default_reporter(),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn TaskReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    fn run_dependencies(&self, meta: &Meta, node: &TaskNode) -> anyhow::Result<Inputs> {
        let dependencies = node.dependencies();
        let run_one = |dependency: &Arc<TaskNode>| {
            self.run(&dependency_meta(meta, dependency), dependency)
                .map(|output| (dependency.task().name(), output))
        };

        if dependencies.len() <= 1 {
            return dependencies.iter().map(&run_one).collect();
        }

        let threads = self.threads.min(dependencies.len());
        trace!(task = %node.task().name(), threads, "building dependency pool");
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("stem-worker-{}", i))
            .build()
            .context("failed to build worker thread pool")?;

        let outputs: Vec<(String, Output)> =
            pool.install(|| dependencies.par_iter().map(&run_one).collect::<anyhow::Result<_>>())?;
        Ok(outputs.into_iter().collect())
    }
}

impl Default for ThreadedRunner {
    fn default() -> Self {
        Self::new(DEFAULT_THREADS)
    }
}

impl TaskRunner for ThreadedRunner {
    fn run(&self, meta: &Meta, node: &Arc<TaskNode>) -> anyhow::Result<Output> {
        let inputs = self.run_dependencies(meta, node)?;
        invoke(self.reporter.as_ref(), node, meta, inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::{counted_fanout, node};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_fanout_runs_every_dependency_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let ws = counted_fanout(12, Arc::clone(&calls));

        let out = ThreadedRunner::new(3)
            .run(&Meta::new(), &node(&ws, "fanout"))
            .unwrap();
        assert_eq!(out.into_value(), json!(12));
        assert_eq!(calls.load(Ordering::SeqCst), 12);
    }

    #[test]
    fn test_thread_count_is_at_least_one() {
        assert_eq!(ThreadedRunner::new(0).threads(), 1);
        assert_eq!(ThreadedRunner::default().threads(), DEFAULT_THREADS);
    }
}
