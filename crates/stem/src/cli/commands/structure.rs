//! Structure command

use std::collections::HashMap;
use std::sync::Arc;

use clap::Args;
use console::style;
use serde::Serialize;
use stem_core::{ResolveError, TaskNode, WorkspaceStructure};
use tracing::info;

use crate::cli::output::{self, task_style, workspace_style};
use crate::cli::{Cli, OutputFormat};

/// Show the tasks of a workspace or the dependency tree of one task
#[derive(Debug, Args)]
pub struct StructureCommand {
    /// Resolve and print the dependency tree of this task path
    #[arg(long, value_name = "TASK")]
    pub tree: Option<String>,
}

/// Serializable view of a resolved node
#[derive(Debug, Serialize, PartialEq)]
struct NodeView {
    task: String,
    workspace: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    unresolved: Vec<String>,
    dependencies: Vec<NodeView>,
}

impl NodeView {
    fn new(node: &TaskNode) -> Self {
        Self {
            task: node.task().name(),
            workspace: node.workspace().name().to_string(),
            unresolved: node.unresolved_dependencies().to_vec(),
            dependencies: node.dependencies().iter().map(|d| NodeView::new(d)).collect(),
        }
    }
}

impl StructureCommand {
    /// Execute the structure command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(workspace = cli.workspace_name(), tree = ?self.tree, "executing structure command");
        let workspace = cli.selected_workspace()?;

        let Some(path) = &self.tree else {
            let structure = workspace.structure();
            match cli.format {
                OutputFormat::Json => output::json(&serde_json::to_value(&structure)?)?,
                OutputFormat::Text => print_structure(&structure, 0),
            }
            return Ok(());
        };

        let task = workspace
            .find_task(path)
            .ok_or_else(|| ResolveError::TaskNotFound(path.clone()))?;
        let root = TaskNode::new(task, None);

        match cli.format {
            OutputFormat::Json => output::json(&serde_json::to_value(NodeView::new(&root))?)?,
            OutputFormat::Text => {
                for line in render_tree(&root) {
                    println!("{}", line);
                }
                if root.has_dependence_errors() && !cli.quiet {
                    println!();
                    output::warning(&format!(
                        "unresolved dependencies: {}",
                        root.all_unresolved().join(", ")
                    ));
                }
            }
        }
        Ok(())
    }
}

fn print_structure(structure: &WorkspaceStructure, depth: usize) {
    let indent = "  ".repeat(depth);
    println!("{}{}", indent, workspace_style().apply_to(&structure.name));
    for task in &structure.tasks {
        println!("{}  {} {}", indent, style("•").dim(), task_style().apply_to(task));
    }
    for child in &structure.workspaces {
        print_structure(child, depth + 1);
    }
}

/// One line per node, indented by depth, with unresolved names marked
fn render_tree(root: &Arc<TaskNode>) -> Vec<String> {
    let mut depths: HashMap<*const TaskNode, usize> = HashMap::new();
    depths.insert(Arc::as_ptr(root), 0);

    let mut lines = vec![node_line(root, 0)];
    for (parent, child) in root.walk() {
        let depth = depths.get(&Arc::as_ptr(&parent)).copied().unwrap_or(0) + 1;
        depths.insert(Arc::as_ptr(&child), depth);
        lines.push(node_line(&child, depth));
    }
    lines
}

fn node_line(node: &TaskNode, depth: usize) -> String {
    let mut line = format!(
        "{}{} {}",
        "  ".repeat(depth),
        task_style().apply_to(node.task().name()),
        style(format!("({})", node.workspace().name())).dim()
    );
    for name in node.unresolved_dependencies() {
        line.push_str(&format!(" {}", style(format!("?{}", name)).red()));
    }
    line
}
