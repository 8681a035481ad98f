//! Execution strategies for resolved task trees
//!
//! Every strategy walks the same tree the same way: each dependency node runs
//! with the slice of the parent meta stored under its task name, and the
//! parent transform receives the original meta plus the dependency outputs
//! keyed by dependency task name. Strategies differ only in how sibling
//! dependencies are scheduled.

mod cooperative;
mod process;
mod sequential;
mod threaded;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::meta::Meta;
use crate::output::{Inputs, Output};
use crate::reporter::{TaskEvent, TaskReporter, TracingReporter};
use crate::tree::TaskNode;

pub use cooperative::CooperativeRunner;
pub use process::{serve_worker, ProcessRunner, WorkerCommand};
pub use sequential::SequentialRunner;
pub use threaded::{ThreadedRunner, DEFAULT_THREADS};

/// How dependencies of a node are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Depth-first, one dependency at a time
    #[default]
    Sequential,
    /// Siblings on a bounded thread pool
    Threaded,
    /// Siblings in worker processes
    Process,
    /// Single-threaded async recursion
    Cooperative,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::Sequential => "sequential",
            ExecutionMode::Threaded => "threaded",
            ExecutionMode::Process => "process",
            ExecutionMode::Cooperative => "cooperative",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequential" => Ok(ExecutionMode::Sequential),
            "threaded" | "thread" => Ok(ExecutionMode::Threaded),
            "process" => Ok(ExecutionMode::Process),
            "cooperative" | "async" => Ok(ExecutionMode::Cooperative),
            other => Err(format!(
                "unknown execution mode '{}' (expected sequential, threaded, process or cooperative)",
                other
            )),
        }
    }
}

/// A synchronous execution strategy
pub trait TaskRunner: Send + Sync {
    /// Execute `node` and its dependencies with `meta`
    fn run(&self, meta: &Meta, node: &Arc<TaskNode>) -> anyhow::Result<Output>;
}

/// The strategy a task master executes with
#[derive(Clone)]
pub enum Runner {
    Sequential(SequentialRunner),
    Threaded(ThreadedRunner),
    Process(ProcessRunner),
    Cooperative(CooperativeRunner),
}

impl Runner {
    /// A runner with default settings for `mode`
    pub fn from_mode(mode: ExecutionMode) -> Self {
        match mode {
            ExecutionMode::Sequential => Runner::Sequential(SequentialRunner::new()),
            ExecutionMode::Threaded => Runner::Threaded(ThreadedRunner::default()),
            ExecutionMode::Process => Runner::Process(ProcessRunner::default()),
            ExecutionMode::Cooperative => Runner::Cooperative(CooperativeRunner::new()),
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        match self {
            Runner::Sequential(_) => ExecutionMode::Sequential,
            Runner::Threaded(_) => ExecutionMode::Threaded,
            Runner::Process(_) => ExecutionMode::Process,
            Runner::Cooperative(_) => ExecutionMode::Cooperative,
        }
    }

    /// Replace the reporter of the wrapped strategy
    pub fn with_reporter(self, reporter: Arc<dyn TaskReporter>) -> Self {
        match self {
            Runner::Sequential(r) => Runner::Sequential(r.with_reporter(reporter)),
            Runner::Threaded(r) => Runner::Threaded(r.with_reporter(reporter)),
            Runner::Process(r) => Runner::Process(r.with_reporter(reporter)),
            Runner::Cooperative(r) => Runner::Cooperative(r.with_reporter(reporter)),
        }
    }

    /// Execute to completion; the cooperative strategy is driven on the current thread
    pub fn run(&self, meta: &Meta, node: &Arc<TaskNode>) -> anyhow::Result<Output> {
        match self {
            Runner::Sequential(r) => r.run(meta, node),
            Runner::Threaded(r) => r.run(meta, node),
            Runner::Process(r) => r.run(meta, node),
            Runner::Cooperative(r) => futures::executor::block_on(r.run(meta.clone(), node)),
        }
    }
}

impl Default for Runner {
    fn default() -> Self {
        Runner::Sequential(SequentialRunner::new())
    }
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Runner").field(&self.mode()).finish()
    }
}

impl From<ExecutionMode> for Runner {
    fn from(mode: ExecutionMode) -> Self {
        Runner::from_mode(mode)
    }
}

macro_rules! runner_from {
    ($($strategy:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$strategy> for Runner {
                fn from(runner: $strategy) -> Self {
                    Runner::$variant(runner)
                }
            }
        )*
    };
}

runner_from! {
    SequentialRunner => Sequential,
    ThreadedRunner => Threaded,
    ProcessRunner => Process,
    CooperativeRunner => Cooperative,
}

pub(crate) fn default_reporter() -> Arc<dyn TaskReporter> {
    Arc::new(TracingReporter)
}

/// Meta handed to a dependency node
pub(crate) fn dependency_meta(meta: &Meta, dependency: &TaskNode) -> Meta {
    meta.slice(&dependency.task().name())
}

/// Invoke a node's own transform, reporting timing and failures
pub(crate) fn invoke(
    reporter: &dyn TaskReporter,
    node: &TaskNode,
    meta: &Meta,
    inputs: Inputs,
) -> anyhow::Result<Output> {
    let task = node.task().name();
    reporter.report(&TaskEvent::Started {
        task: task.clone(),
        workspace: node.workspace().name().to_string(),
    });

    let start = Instant::now();
    let result = node.task().transform(meta, inputs);
    let duration = start.elapsed();

    match &result {
        Ok(_) => reporter.report(&TaskEvent::Completed { task, duration }),
        Err(e) => reporter.report(&TaskEvent::Failed {
            task,
            duration,
            error: format!("{:#}", e),
        }),
    }
    result
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for strategy tests

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use anyhow::anyhow;
    use serde_json::{json, Value};

    use crate::output::Output;
    use crate::task::{source, task, FnTask, MapTask, ReduceTask, Task};
    use crate::tree::TaskNode;
    use crate::workspace::Workspace;

    /// `total = reduce(+, map(x*x, numbers)) + offset`, with per-task meta
    pub fn arithmetic() -> Arc<Workspace> {
        let offset: Arc<dyn Task> = Arc::new(FnTask::new("offset", |meta, _| {
            Ok(Output::value(meta.get_or("value", json!(0))))
        }));

        Workspace::builder("arithmetic")
            .task(source("numbers", |meta| {
                let n = meta.get("count").and_then(Value::as_i64).unwrap_or(4);
                Ok(Value::Array((1..=n).map(Value::from).collect()))
            }))
            .task(Arc::new(MapTask::new(
                |v| json!(v.as_i64().unwrap_or(0) * v.as_i64().unwrap_or(0)),
                "numbers",
            )))
            .task(Arc::new(ReduceTask::new(
                |a, b| json!(a.as_i64().unwrap_or(0) + b.as_i64().unwrap_or(0)),
                "map_numbers",
            )))
            .task(offset)
            .task(task("total", &["reduce_map_numbers", "offset"], |_, mut inputs| {
                let sum = inputs.value("reduce_map_numbers")?.as_i64().unwrap_or(0);
                let offset = inputs.value("offset")?.as_i64().unwrap_or(0);
                Ok(Output::value(sum + offset))
            }))
            .build()
    }

    pub fn node(ws: &Arc<Workspace>, name: &str) -> Arc<TaskNode> {
        TaskNode::new(ws.find_task(name).expect("task exists"), Some(Arc::clone(ws)))
    }

    /// Workspace whose `fanout` task has `width` independent counted leaves
    pub fn counted_fanout(width: usize, calls: Arc<AtomicUsize>) -> Arc<Workspace> {
        let names: Vec<String> = (0..width).map(|i| format!("leaf{}", i)).collect();
        let mut builder = Workspace::builder("fanout");
        for (i, name) in names.iter().enumerate() {
            let calls = Arc::clone(&calls);
            builder = builder.task(source(name.clone(), move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(i as i64)
            }));
        }
        let fanout = names
            .iter()
            .fold(FnTask::new("fanout", |_, inputs| {
                Ok(Output::value(inputs.len()))
            }), |t, name| t.depends_on(name.clone()));
        builder.task(Arc::new(fanout)).build()
    }

    pub fn failing() -> Arc<Workspace> {
        Workspace::builder("failing")
            .task(source("broken", |_| -> anyhow::Result<i64> { Err(anyhow!("boom")) }))
            .task(task("top", &["broken"], |_, _| Ok(Output::value(1))))
            .build()
    }
}
