//! Hierarchical task namespaces
//!
//! A [`Workspace`] owns named tasks and child workspaces. Workspaces are
//! assembled with a [`WorkspaceBuilder`] and are immutable once built. Every
//! task registered in a workspace is bound to it as its home, which is where a
//! task's dependency names are resolved when no workspace is given explicitly.

use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::meta::{Meta, Specification};
use crate::output::{Inputs, Output};
use crate::task::{Dependency, ProxyTask, Task};

/// A dotted task path such as `numbers.square`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskPath {
    segments: Vec<String>,
}

impl TaskPath {
    pub fn new(path: &str) -> Self {
        Self {
            segments: path.split('.').map(str::to_string).collect(),
        }
    }

    pub fn from_segments(segments: Vec<String>) -> Self {
        Self { segments }
    }

    /// A path with a single segment
    pub fn is_leaf(&self) -> bool {
        self.segments.len() <= 1
    }

    /// First segment
    pub fn head(&self) -> &str {
        self.segments.first().map(String::as_str).unwrap_or("")
    }

    /// Everything after the first segment
    pub fn sub_path(&self) -> TaskPath {
        Self {
            segments: self.segments.iter().skip(1).cloned().collect(),
        }
    }

    /// Last segment, the task name
    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for TaskPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl From<&str> for TaskPath {
    fn from(path: &str) -> Self {
        TaskPath::new(path)
    }
}

/// Serializable outline of a workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceStructure {
    pub name: String,
    pub tasks: Vec<String>,
    pub workspaces: Vec<WorkspaceStructure>,
}

/// A named namespace of tasks and child workspaces
pub struct Workspace {
    name: String,
    tasks: IndexMap<String, Arc<dyn Task>>,
    workspaces: Vec<Arc<Workspace>>,
}

impl Workspace {
    /// Start building a workspace
    pub fn builder(name: impl Into<String>) -> WorkspaceBuilder {
        WorkspaceBuilder::new(name)
    }

    /// A workspace holding only `task`, named after it
    pub fn standalone(task: Arc<dyn Task>) -> Arc<Workspace> {
        WorkspaceBuilder::new(task.name()).task(task).build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tasks(&self) -> &IndexMap<String, Arc<dyn Task>> {
        &self.tasks
    }

    pub fn workspaces(&self) -> &[Arc<Workspace>] {
        &self.workspaces
    }

    /// Task names in registration order
    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.keys().map(String::as_str).collect()
    }

    /// Resolve a dotted path.
    ///
    /// A single segment matches this workspace's tasks first, then is searched
    /// depth-first through the children. A longer path descends into the child
    /// named by its head segment.
    pub fn find_task(&self, path: &str) -> Option<Arc<dyn Task>> {
        self.find_task_path(&TaskPath::new(path))
    }

    pub fn find_task_path(&self, path: &TaskPath) -> Option<Arc<dyn Task>> {
        if path.is_leaf() {
            if let Some(task) = self.tasks.get(path.name()) {
                return Some(Arc::clone(task));
            }
            self.workspaces
                .iter()
                .find_map(|child| child.find_task_path(path))
        } else {
            self.workspaces
                .iter()
                .find(|child| child.name() == path.head())
                .and_then(|child| child.find_task_path(&path.sub_path()))
        }
    }

    pub fn has_task(&self, path: &str) -> bool {
        self.find_task(path).is_some()
    }

    /// Find a descendant workspace by name, depth-first
    pub fn get_workspace(&self, name: &str) -> Option<Arc<Workspace>> {
        for child in &self.workspaces {
            if child.name() == name {
                return Some(Arc::clone(child));
            }
            if let Some(found) = child.get_workspace(name) {
                return Some(found);
            }
        }
        None
    }

    pub fn structure(&self) -> WorkspaceStructure {
        WorkspaceStructure {
            name: self.name.clone(),
            tasks: self.tasks.keys().cloned().collect(),
            workspaces: self.workspaces.iter().map(|w| w.structure()).collect(),
        }
    }
}

impl fmt::Debug for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspace")
            .field("name", &self.name)
            .field("tasks", &self.task_names())
            .field("workspaces", &self.workspaces)
            .finish()
    }
}

/// Find a workspace by name: `root` itself or one of its descendants
pub fn locate_workspace(root: &Arc<Workspace>, name: &str) -> Option<Arc<Workspace>> {
    if root.name() == name {
        Some(Arc::clone(root))
    } else {
        root.get_workspace(name)
    }
}

/// Whether two workspace handles point at the same workspace
pub fn same_workspace(a: &Arc<Workspace>, b: &Arc<Workspace>) -> bool {
    Arc::ptr_eq(a, b)
}

/// Accumulates tasks and child workspaces, then produces an immutable [`Workspace`]
pub struct WorkspaceBuilder {
    name: String,
    tasks: IndexMap<String, Arc<dyn Task>>,
    workspaces: Vec<Arc<Workspace>>,
}

impl WorkspaceBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: IndexMap::new(),
            workspaces: Vec::new(),
        }
    }

    /// Register a task under its own name
    pub fn task(self, task: Arc<dyn Task>) -> Self {
        let name = task.name();
        self.insert(name, task)
    }

    /// Register a task pulled from elsewhere under a new name
    pub fn task_as(self, alias: impl Into<String>, task: Arc<dyn Task>) -> Self {
        let alias = alias.into();
        let proxy: Arc<dyn Task> = Arc::new(ProxyTask::new(alias.clone(), task));
        self.insert(alias, proxy)
    }

    /// Register a child workspace; a later child with the same name replaces an earlier one
    pub fn workspace(mut self, workspace: Arc<Workspace>) -> Self {
        if let Some(pos) = self
            .workspaces
            .iter()
            .position(|w| w.name() == workspace.name())
        {
            debug!(workspace = workspace.name(), "replacing child workspace");
            self.workspaces[pos] = workspace;
        } else {
            self.workspaces.push(workspace);
        }
        self
    }

    fn insert(mut self, name: String, task: Arc<dyn Task>) -> Self {
        if self.tasks.insert(name.clone(), task).is_some() {
            debug!(workspace = %self.name, task = %name, "replacing task");
        }
        self
    }

    pub fn build(self) -> Arc<Workspace> {
        let WorkspaceBuilder {
            name,
            tasks,
            workspaces,
        } = self;

        Arc::new_cyclic(|home| Workspace {
            name,
            tasks: tasks
                .into_iter()
                .map(|(key, task)| {
                    let bound: Arc<dyn Task> = Arc::new(HomedTask {
                        inner: task,
                        home: home.clone(),
                    });
                    (key, bound)
                })
                .collect(),
            workspaces,
        })
    }
}

/// A task bound to the workspace it was registered in
struct HomedTask {
    inner: Arc<dyn Task>,
    home: Weak<Workspace>,
}

impl Task for HomedTask {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn dependencies(&self) -> Vec<Dependency> {
        self.inner.dependencies()
    }

    fn specification(&self) -> Option<&Specification> {
        self.inner.specification()
    }

    fn settings(&self) -> Option<&Meta> {
        self.inner.settings()
    }

    fn home(&self) -> Option<Arc<Workspace>> {
        self.home.upgrade()
    }

    fn transform(&self, meta: &Meta, inputs: Inputs) -> anyhow::Result<Output> {
        self.inner.transform(meta, inputs)
    }
}
