//! Process-pool strategy and the worker side of its protocol
//!
//! Each dependency subtree is handed to a child process as one `run`
//! envelope naming the workspace, the task and its meta slice. The child
//! resolves the task by name, runs it sequentially and answers with a
//! `task_result` envelope.

use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use rayon::prelude::*;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::envelope::Envelope;
use crate::meta::Meta;
use crate::output::{Inputs, Output};
use crate::reporter::TaskReporter;
use crate::task::same_task;
use crate::tree::TaskNode;
use crate::workspace::Workspace;

use super::{default_reporter, dependency_meta, invoke, SequentialRunner, TaskRunner};

/// How to launch a worker process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        command
    }
}

impl Default for WorkerCommand {
    /// The running executable's `worker` subcommand
    fn default() -> Self {
        let program = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("stem"));
        Self::new(program).arg("worker")
    }
}

fn available_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Runs the dependencies of each node in worker processes, at most one per CPU at a time
#[derive(Clone)]
pub struct ProcessRunner {
    command: WorkerCommand,
    workers: usize,
    reporter: Arc<dyn TaskReporter>,
}

impl ProcessRunner {
    pub fn new(command: WorkerCommand) -> Self {
        Self {
            command,
            workers: available_workers(),
            reporter: default_reporter(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn TaskReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn command(&self) -> &WorkerCommand {
        &self.command
    }

    /// Run one dependency subtree, in a worker when the task is addressable by name
    fn run_dependency(&self, meta: Meta, dependency: &Arc<TaskNode>) -> anyhow::Result<Output> {
        let name = dependency.task().name();
        let addressable = dependency
            .workspace()
            .find_task(&name)
            .is_some_and(|found| same_task(&found, dependency.task()));

        if addressable {
            self.spawn_worker(&meta, dependency)
        } else {
            debug!(task = %name, "task is not addressable by name, running in-process");
            SequentialRunner::new()
                .with_reporter(Arc::clone(&self.reporter))
                .run(&meta, dependency)
        }
    }

    #[instrument(skip_all, fields(task = %node.task().name()))]
    fn spawn_worker(&self, meta: &Meta, node: &TaskNode) -> anyhow::Result<Output> {
        let request = Envelope::new(
            Meta::new()
                .with("command", "run")
                .with("workspace", node.workspace().name())
                .with("task", node.task().name())
                .with("task_meta", meta.clone().into_value()),
        );

        let mut child = self
            .command
            .command()
            .spawn()
            .with_context(|| format!("failed to start worker {}", self.command.program.display()))?;

        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("worker stdin unavailable"))?;
            request.write_to(&mut stdin)?;
        }

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("worker stdout unavailable"))?;
        let response = Envelope::read(&mut stdout);
        let status = child.wait()?;

        let response = match response {
            Ok(response) => response,
            Err(e) if !status.success() => bail!("worker exited with {}: {}", status, e),
            Err(e) => return Err(e.into()),
        };

        if !response.is_success() {
            bail!("{}", response.error().unwrap_or("worker failed"));
        }
        let value = response
            .meta
            .get("task_result")
            .cloned()
            .ok_or_else(|| anyhow!("worker response has no task_result"))?;
        debug!(%status, "worker finished");
        Ok(Output::Value(value))
    }

    fn run_dependencies(&self, meta: &Meta, node: &TaskNode) -> anyhow::Result<Inputs> {
        let dependencies = node.dependencies();
        if dependencies.is_empty() {
            return Ok(Inputs::new());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers.min(dependencies.len()))
            .build()
            .context("failed to build worker pool")?;

        let outputs: Vec<(String, Output)> = pool.install(|| {
            dependencies
                .par_iter()
                .map(|dependency| {
                    self.run_dependency(dependency_meta(meta, dependency), dependency)
                        .map(|output| (dependency.task().name(), output))
                })
                .collect::<anyhow::Result<_>>()
        })?;
        Ok(outputs.into_iter().collect())
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(WorkerCommand::default())
    }
}

impl TaskRunner for ProcessRunner {
    fn run(&self, meta: &Meta, node: &Arc<TaskNode>) -> anyhow::Result<Output> {
        let inputs = self.run_dependencies(meta, node)?;
        invoke(self.reporter.as_ref(), node, meta, inputs)
    }
}

/// Answer one worker request read from `reader`.
///
/// `lookup` maps a workspace name to a workspace of the same registry the
/// parent resolved its tree in.
pub fn serve_worker<R, W, F>(lookup: F, reader: &mut R, writer: &mut W) -> crate::Result<()>
where
    R: Read,
    W: Write,
    F: Fn(&str) -> Option<Arc<Workspace>>,
{
    let request = Envelope::read(reader)?;
    let response = match handle_worker_request(&lookup, &request.meta) {
        Ok(value) => Envelope::success(Meta::new().with("task_result", value)),
        Err(e) => Envelope::failure(format!("{:#}", e)),
    };
    response.write_to(writer)?;
    Ok(())
}

fn handle_worker_request<F>(lookup: &F, request: &Meta) -> anyhow::Result<Value>
where
    F: Fn(&str) -> Option<Arc<Workspace>>,
{
    let field = |key: &str| {
        request
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("KeyError: {}", key))
    };

    if field("command")? != "run" {
        bail!("worker only accepts run requests");
    }
    let workspace_name = field("workspace")?;
    let task_name = field("task")?;

    let workspace =
        lookup(workspace_name).ok_or_else(|| anyhow!("workspace not found: {}", workspace_name))?;
    let task = workspace
        .find_task(task_name)
        .ok_or_else(|| anyhow!("task not found: {}", task_name))?;

    let node = TaskNode::new(task, Some(workspace));
    if node.has_dependence_errors() {
        bail!("unresolved dependencies: {}", node.all_unresolved().join(", "));
    }

    let meta = request.slice("task_meta");
    let output = SequentialRunner::new().run(&meta, &node)?;
    Ok(output.into_value())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::arithmetic;
    use crate::workspace::locate_workspace;
    use serde_json::json;

    fn serve(request: Meta) -> Envelope {
        let root = arithmetic();
        let input = Envelope::new(request).to_bytes().unwrap();
        let mut output = Vec::new();
        serve_worker(
            |name| locate_workspace(&root, name),
            &mut &input[..],
            &mut output,
        )
        .unwrap();
        Envelope::from_bytes(&output).unwrap()
    }

    fn run_request(task: &str, task_meta: Value) -> Meta {
        Meta::new()
            .with("command", "run")
            .with("workspace", "arithmetic")
            .with("task", task)
            .with("task_meta", task_meta)
    }

    #[test]
    fn test_worker_runs_named_task() {
        let response = serve(run_request("map_numbers", json!({"numbers": {"count": 3}})));
        assert!(response.is_success());
        assert_eq!(response.meta.get("task_result"), Some(&json!([1, 4, 9])));
    }

    #[test]
    fn test_worker_reports_unknown_task() {
        let response = serve(run_request("missing", json!({})));
        assert_eq!(response.error(), Some("task not found: missing"));
    }

    #[test]
    fn test_worker_reports_unknown_workspace() {
        let request = run_request("numbers", json!({})).with("workspace", "elsewhere");
        let response = serve(request);
        assert_eq!(response.error(), Some("workspace not found: elsewhere"));
    }

    #[test]
    fn test_worker_requires_task_key() {
        let response = serve(Meta::new().with("command", "run").with("workspace", "arithmetic"));
        assert_eq!(response.error(), Some("KeyError: task"));
    }

    #[test]
    fn test_missing_worker_program_fails() {
        let runner = ProcessRunner::new(WorkerCommand::new("/nonexistent/stem-worker"));
        let ws = arithmetic();
        let node = TaskNode::new(ws.find_task("map_numbers").unwrap(), Some(ws));
        let err = runner.run(&Meta::new(), &node).unwrap_err();
        assert!(err.to_string().contains("failed to start worker"));
    }

    #[test]
    fn test_default_command_uses_worker_subcommand() {
        let command = WorkerCommand::default();
        assert_eq!(command.args, vec![OsString::from("worker")]);
    }
}
