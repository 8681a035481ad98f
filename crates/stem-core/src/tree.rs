//! Lazy dependency resolution
//!
//! A [`TaskNode`] is one resolution of a task inside a workspace. Dependency
//! names are looked up in that workspace when the node is built; names that
//! cannot be found are recorded rather than raised, and the node reports
//! `has_dependence_errors` if any node in its subtree has one.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::task::{same_task, Dependency, Task};
use crate::workspace::{same_workspace, Workspace};

/// A task resolved within a specific workspace
pub struct TaskNode {
    task: Arc<dyn Task>,
    workspace: Arc<Workspace>,
    dependencies: Vec<Arc<TaskNode>>,
    unresolved_dependencies: Vec<String>,
    has_dependence_errors: bool,
}

impl TaskNode {
    /// Resolve `task` in `workspace`, or in the task's home workspace when none is given
    #[instrument(skip_all, fields(task = %task.name()))]
    pub fn new(task: Arc<dyn Task>, workspace: Option<Arc<Workspace>>) -> Arc<TaskNode> {
        let workspace = workspace.unwrap_or_else(|| home_workspace(&task));
        let mut path = Vec::new();
        let node = Self::build(task, workspace, &mut path);
        debug!(
            has_dependence_errors = node.has_dependence_errors,
            "task node resolved"
        );
        node
    }

    fn build(
        task: Arc<dyn Task>,
        workspace: Arc<Workspace>,
        path: &mut Vec<Arc<dyn Task>>,
    ) -> Arc<TaskNode> {
        path.push(Arc::clone(&task));

        let mut dependencies = Vec::new();
        let mut unresolved_dependencies = Vec::new();

        for dependency in task.dependencies() {
            let resolved = match &dependency {
                Dependency::Name(name) => workspace.find_task(name),
                Dependency::Task(direct) => Some(Arc::clone(direct)),
            };

            match resolved {
                Some(dep) if path.iter().any(|seen| same_task(seen, &dep)) => {
                    warn!(
                        task = %task.name(),
                        dependency = %dependency.input_name(),
                        "dependency cycle"
                    );
                    unresolved_dependencies.push(dependency_label(&dependency));
                }
                Some(dep) => {
                    dependencies.push(Self::build(dep, Arc::clone(&workspace), path));
                }
                None => {
                    debug!(
                        task = %task.name(),
                        workspace = workspace.name(),
                        dependency = %dependency_label(&dependency),
                        "unresolved dependency"
                    );
                    unresolved_dependencies.push(dependency_label(&dependency));
                }
            }
        }

        path.pop();

        let has_dependence_errors = !unresolved_dependencies.is_empty()
            || dependencies.iter().any(|d| d.has_dependence_errors());

        Arc::new(TaskNode {
            task,
            workspace,
            dependencies,
            unresolved_dependencies,
            has_dependence_errors,
        })
    }

    pub fn task(&self) -> &Arc<dyn Task> {
        &self.task
    }

    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    /// Resolved child nodes, one per resolvable dependency
    pub fn dependencies(&self) -> &[Arc<TaskNode>] {
        &self.dependencies
    }

    /// Dependency names that could not be resolved at this node
    pub fn unresolved_dependencies(&self) -> &[String] {
        &self.unresolved_dependencies
    }

    pub fn is_leaf(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// True if this node or any node below it has an unresolved dependency
    pub fn has_dependence_errors(&self) -> bool {
        self.has_dependence_errors
    }

    /// All unresolved names in the subtree, qualified by the task that declared them
    pub fn all_unresolved(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .unresolved_dependencies
            .iter()
            .map(|dep| format!("{}->{}", self.task.name(), dep))
            .collect();
        for child in &self.dependencies {
            names.extend(child.all_unresolved());
        }
        names
    }

    /// Parent/child edges of the subtree in pre-order
    pub fn walk(self: &Arc<Self>) -> Vec<(Arc<TaskNode>, Arc<TaskNode>)> {
        let mut edges = Vec::new();
        for child in &self.dependencies {
            edges.push((Arc::clone(self), Arc::clone(child)));
            edges.extend(child.walk());
        }
        edges
    }

    fn matches(&self, task: &Arc<dyn Task>, workspace: &Arc<Workspace>) -> bool {
        same_task(&self.task, task) && same_workspace(&self.workspace, workspace)
    }
}

impl std::fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskNode")
            .field("task", &self.task.name())
            .field("workspace", &self.workspace.name())
            .field("dependencies", &self.dependencies)
            .field("unresolved_dependencies", &self.unresolved_dependencies)
            .finish()
    }
}

fn dependency_label(dependency: &Dependency) -> String {
    match dependency {
        Dependency::Name(name) => name.clone(),
        Dependency::Task(task) => task.name(),
    }
}

/// The workspace a task resolves in when none is given
pub fn home_workspace(task: &Arc<dyn Task>) -> Arc<Workspace> {
    task.home().unwrap_or_else(|| {
        debug!(task = %task.name(), "task has no home workspace, using a standalone one");
        Workspace::standalone(Arc::clone(task))
    })
}

/// A resolved tree anchored at one root, reused across repeated executions
#[derive(Debug)]
pub struct TaskTree {
    root: Arc<TaskNode>,
}

impl TaskTree {
    pub fn new(root: Arc<dyn Task>, workspace: Option<Arc<Workspace>>) -> Self {
        Self {
            root: TaskNode::new(root, workspace),
        }
    }

    pub fn root(&self) -> &Arc<TaskNode> {
        &self.root
    }

    /// Find an existing node for `(task, workspace)` anywhere in the tree.
    ///
    /// Without a workspace the task's home is used. A homeless root keeps the
    /// standalone workspace it was first resolved in.
    pub fn find_node(
        &self,
        task: &Arc<dyn Task>,
        workspace: Option<&Arc<Workspace>>,
    ) -> Option<Arc<TaskNode>> {
        let workspace = match workspace {
            Some(ws) => Arc::clone(ws),
            None => match task.home() {
                Some(home) => home,
                None if same_task(&self.root.task, task) => Arc::clone(&self.root.workspace),
                None => return None,
            },
        };
        find_in(&self.root, task, &workspace)
    }

    /// Reuse a matching node, or resolve a fresh one outside the tree
    pub fn resolve_node(
        &self,
        task: &Arc<dyn Task>,
        workspace: Option<&Arc<Workspace>>,
    ) -> Arc<TaskNode> {
        match self.find_node(task, workspace) {
            Some(node) => {
                debug!(task = %task.name(), "reusing resolved node");
                node
            }
            None => TaskNode::new(Arc::clone(task), workspace.cloned()),
        }
    }
}

fn find_in(
    node: &Arc<TaskNode>,
    task: &Arc<dyn Task>,
    workspace: &Arc<Workspace>,
) -> Option<Arc<TaskNode>> {
    if node.matches(task, workspace) {
        return Some(Arc::clone(node));
    }
    node.dependencies
        .iter()
        .find_map(|child| find_in(child, task, workspace))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Output;
    use crate::task::{source, task, FnTask};

    fn combine() -> Arc<dyn Task> {
        task("combine", &["a", "b", "c"], |_, _| Ok(Output::value(0)))
    }

    fn workspace_with(names: &[&str]) -> Arc<Workspace> {
        names
            .iter()
            .fold(Workspace::builder("ws").task(combine()), |b, name| {
                b.task(source(*name, |_| Ok(1)))
            })
            .build()
    }

    #[test]
    fn test_all_dependencies_resolved() {
        let ws = workspace_with(&["a", "b", "c"]);
        let node = TaskNode::new(ws.find_task("combine").unwrap(), Some(Arc::clone(&ws)));

        assert!(!node.has_dependence_errors());
        assert_eq!(node.dependencies().len(), 3);
        assert!(node.unresolved_dependencies().is_empty());
        assert!(!node.is_leaf());
    }

    #[test]
    fn test_removing_any_dependency_flags_error() {
        for missing in ["a", "b", "c"] {
            let present: Vec<&str> = ["a", "b", "c"]
                .into_iter()
                .filter(|n| *n != missing)
                .collect();
            let ws = workspace_with(&present);
            let node = TaskNode::new(ws.find_task("combine").unwrap(), Some(Arc::clone(&ws)));

            assert!(node.has_dependence_errors(), "missing {missing}");
            assert_eq!(node.unresolved_dependencies(), &[missing.to_string()]);
        }
    }

    #[test]
    fn test_errors_propagate_from_deep_nodes() {
        let ws = Workspace::builder("ws")
            .task(task("top", &["middle"], |_, _| Ok(Output::value(0))))
            .task(task("middle", &["bottom"], |_, _| Ok(Output::value(0))))
            .build();
        let node = TaskNode::new(ws.find_task("top").unwrap(), None);

        assert!(node.has_dependence_errors());
        assert!(node.unresolved_dependencies().is_empty());
        assert_eq!(node.all_unresolved(), vec!["middle->bottom".to_string()]);
    }

    #[test]
    fn test_home_workspace_used_when_none_given() {
        let ws = workspace_with(&["a", "b", "c"]);
        let node = TaskNode::new(ws.find_task("combine").unwrap(), None);
        assert!(same_workspace(node.workspace(), &ws));
        assert!(!node.has_dependence_errors());
    }

    #[test]
    fn test_homeless_task_uses_standalone_workspace() {
        let node = TaskNode::new(combine(), None);
        assert_eq!(node.workspace().name(), "combine");
        assert!(node.has_dependence_errors());
    }

    #[test]
    fn test_direct_reference_dependency() {
        let base = source("base", |_| Ok(2));
        let top: Arc<dyn Task> = Arc::new(
            FnTask::new("top", |_, _| Ok(Output::value(0))).depends_on(Arc::clone(&base)),
        );
        let node = TaskNode::new(top, None);
        assert!(!node.has_dependence_errors());
        assert_eq!(node.dependencies()[0].task().name(), "base");
    }

    #[test]
    fn test_cycle_is_reported_as_unresolved() {
        let ws = Workspace::builder("ws")
            .task(task("ping", &["pong"], |_, _| Ok(Output::value(0))))
            .task(task("pong", &["ping"], |_, _| Ok(Output::value(0))))
            .build();
        let node = TaskNode::new(ws.find_task("ping").unwrap(), None);
        assert!(node.has_dependence_errors());
        assert_eq!(node.all_unresolved(), vec!["pong->ping".to_string()]);
    }

    #[test]
    fn test_walk_edges() {
        let ws = workspace_with(&["a", "b", "c"]);
        let node = TaskNode::new(ws.find_task("combine").unwrap(), None);
        let edges: Vec<(String, String)> = node
            .walk()
            .iter()
            .map(|(p, c)| (p.task().name(), c.task().name()))
            .collect();
        assert_eq!(edges.len(), 3);
        assert_eq!(edges[0], ("combine".to_string(), "a".to_string()));
    }

    #[test]
    fn test_tree_reuses_nodes() {
        let ws = workspace_with(&["a", "b", "c"]);
        let tree = TaskTree::new(ws.find_task("combine").unwrap(), Some(Arc::clone(&ws)));

        let a = ws.find_task("a").unwrap();
        let found = tree.resolve_node(&a, Some(&ws));
        assert!(Arc::ptr_eq(&found, &tree.root().dependencies()[0]));

        let root_task = Arc::clone(tree.root().task());
        assert!(Arc::ptr_eq(&tree.resolve_node(&root_task, None), tree.root()));
    }

    #[test]
    fn test_tree_reuses_homeless_root() {
        let solo: Arc<dyn Task> = source("solo", |_| Ok(1));
        assert!(solo.home().is_none());

        let tree = TaskTree::new(Arc::clone(&solo), None);
        let again = tree.resolve_node(&solo, None);
        assert!(Arc::ptr_eq(tree.root(), &again));
        assert_eq!(again.workspace().name(), "solo");
    }

    #[test]
    fn test_tree_builds_fresh_node_for_unknown_pair() {
        let ws = workspace_with(&["a", "b", "c"]);
        let tree = TaskTree::new(ws.find_task("combine").unwrap(), Some(Arc::clone(&ws)));

        let other = workspace_with(&["a"]);
        let a = other.find_task("a").unwrap();
        assert!(tree.find_node(&a, Some(&other)).is_none());
        let fresh = tree.resolve_node(&a, Some(&other));
        assert!(same_workspace(fresh.workspace(), &other));
    }
}
