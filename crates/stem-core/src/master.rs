//! Orchestration: validate one request and defer its execution
//!
//! [`TaskMaster::execute`] never runs anything eagerly. It resolves the node,
//! stops at dependency or meta errors, and otherwise returns a [`TaskResult`]
//! whose data is computed by the bound runner on first access.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::anyhow;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::error::{InvocationError, ResolveError};
use crate::meta::{Meta, MetaVerification, Specification};
use crate::output::Output;
use crate::runner::Runner;
use crate::task::Task;
use crate::tree::{TaskNode, TaskTree};
use crate::workspace::Workspace;

/// Outcome category of an orchestration call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// A dependency could not be resolved; nothing ran
    DependenciesError,
    /// The meta failed verification; nothing ran
    MetaError,
    /// The transform failed when the data was read
    InvocationError,
    /// Data is available (computed on first access)
    ContainsData,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::DependenciesError => "dependencies_error",
            TaskStatus::MetaError => "meta_error",
            TaskStatus::InvocationError => "invocation_error",
            TaskStatus::ContainsData => "contains_data",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured description of a failed meta verification
#[derive(Debug, Clone)]
pub struct TaskMetaError {
    pub task_node: Arc<TaskNode>,
    pub meta_error: MetaVerification,
    pub specification: Specification,
}

type Deferred = Box<dyn FnOnce() -> anyhow::Result<Output> + Send>;

/// Result of one orchestration call
pub struct TaskResult {
    status: TaskStatus,
    task_node: Arc<TaskNode>,
    meta_errors: Option<TaskMetaError>,
    deferred: Mutex<Option<Deferred>>,
    data: OnceLock<Result<Output, InvocationError>>,
}

impl TaskResult {
    fn new(status: TaskStatus, task_node: Arc<TaskNode>) -> Self {
        Self {
            status,
            task_node,
            meta_errors: None,
            deferred: Mutex::new(None),
            data: OnceLock::new(),
        }
    }

    fn with_meta_errors(task_node: Arc<TaskNode>, errors: TaskMetaError) -> Self {
        Self {
            meta_errors: Some(errors),
            ..Self::new(TaskStatus::MetaError, task_node)
        }
    }

    fn deferred<F>(task_node: Arc<TaskNode>, compute: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<Output> + Send + 'static,
    {
        Self {
            deferred: Mutex::new(Some(Box::new(compute))),
            ..Self::new(TaskStatus::ContainsData, task_node)
        }
    }

    /// Current status; reads `InvocationError` once a data access has failed
    pub fn status(&self) -> TaskStatus {
        match (self.status, self.data.get()) {
            (TaskStatus::ContainsData, Some(Err(_))) => TaskStatus::InvocationError,
            (status, _) => status,
        }
    }

    pub fn task_node(&self) -> &Arc<TaskNode> {
        &self.task_node
    }

    pub fn meta_errors(&self) -> Option<&TaskMetaError> {
        self.meta_errors.as_ref()
    }

    /// The task output, computed at most once.
    ///
    /// A failure is cached as well and returned again on every later access.
    /// A panicking computation is recorded as an invocation failure.
    pub fn data(&self) -> Result<&Output, InvocationError> {
        self.data
            .get_or_init(|| {
                let compute = self
                    .deferred
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .take();
                match compute {
                    Some(compute) => run_deferred(compute).map_err(|e| {
                        warn!(task = %self.task_node.task().name(), error = %e, "invocation failed");
                        InvocationError::from(e)
                    }),
                    None => Err(InvocationError::new(anyhow!(
                        "no data: task finished with status {}",
                        self.status
                    ))),
                }
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Consume the result, computing the output if it has not been read yet
    pub fn into_output(self) -> Result<Output, InvocationError> {
        self.data()?;
        match self.data.into_inner() {
            Some(result) => result,
            None => Err(InvocationError::new(anyhow!("task result was not computed"))),
        }
    }

    /// Consume the result, materialising the output as a JSON value
    pub fn into_value(self) -> Result<Value, InvocationError> {
        self.into_output().map(Output::into_value)
    }
}

fn run_deferred(compute: Deferred) -> anyhow::Result<Output> {
    panic::catch_unwind(AssertUnwindSafe(compute))
        .unwrap_or_else(|payload| Err(anyhow!("task panicked: {}", panic_message(&*payload))))
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}

impl fmt::Debug for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskResult")
            .field("status", &self.status())
            .field("task", &self.task_node.task().name())
            .field("meta_errors", &self.meta_errors)
            .finish()
    }
}

/// Validates and dispatches top-level execution requests
#[derive(Debug, Default)]
pub struct TaskMaster {
    runner: Runner,
    tree: Option<TaskTree>,
}

impl TaskMaster {
    pub fn new(runner: impl Into<Runner>) -> Self {
        Self {
            runner: runner.into(),
            tree: None,
        }
    }

    /// Reuse nodes of `tree` across calls
    pub fn with_tree(mut self, tree: TaskTree) -> Self {
        self.tree = Some(tree);
        self
    }

    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    pub fn tree(&self) -> Option<&TaskTree> {
        self.tree.as_ref()
    }

    /// Resolve, validate and defer the execution of `task`
    #[instrument(skip_all, fields(task = %task.name(), mode = %self.runner.mode()))]
    pub fn execute(
        &self,
        meta: Meta,
        task: &Arc<dyn Task>,
        workspace: Option<&Arc<Workspace>>,
    ) -> TaskResult {
        let node = match &self.tree {
            Some(tree) => tree.resolve_node(task, workspace),
            None => TaskNode::new(Arc::clone(task), workspace.cloned()),
        };

        if node.has_dependence_errors() {
            info!(unresolved = ?node.all_unresolved(), "dependency resolution failed");
            return TaskResult::new(TaskStatus::DependenciesError, node);
        }

        if let Some(specification) = task.specification() {
            let verification = MetaVerification::verify(&meta, Some(specification));
            if !verification.checked_success() {
                info!(errors = %verification, "meta verification failed");
                let errors = TaskMetaError {
                    task_node: Arc::clone(&node),
                    meta_error: verification,
                    specification: specification.clone(),
                };
                return TaskResult::with_meta_errors(node, errors);
            }
        }

        debug!("execution deferred");
        let runner = self.runner.clone();
        let run_node = Arc::clone(&node);
        TaskResult::deferred(node, move || runner.run(&meta, &run_node))
    }

    /// Look up a dotted path in `workspace` and execute it in its home workspace
    pub fn execute_path(
        &self,
        meta: Meta,
        workspace: &Arc<Workspace>,
        path: &str,
    ) -> Result<TaskResult, ResolveError> {
        let task = workspace
            .find_task(path)
            .ok_or_else(|| ResolveError::TaskNotFound(path.to_string()))?;
        Ok(self.execute(meta, &task, None))
    }
}
