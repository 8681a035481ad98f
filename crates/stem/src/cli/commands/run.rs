//! Run command

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Args;
use console::style;
use serde_json::{json, Value};
use stem_core::{
    ExecutionMode, Meta, MetaFieldError, TaskEvent, TaskMaster, TaskReporter, TaskResult,
    TaskStatus,
};
use stem_remote::RemoteWorkspace;
use tracing::info;

use crate::cli::output::{self, status_style};
use crate::cli::{build_runner, Cli, OutputFormat};
use crate::exit_codes;

/// Execute a task and print its result
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Dotted path of the task (e.g. text.shout)
    pub task_path: String,

    /// Meta as a JSON object, or @FILE to read it from a file
    #[arg(short, long, value_name = "JSON")]
    pub meta: Option<String>,

    /// Execution strategy (defaults to runner.mode from the config)
    #[arg(long)]
    pub mode: Option<ExecutionMode>,

    /// Worker threads per node in threaded mode
    #[arg(long)]
    pub threads: Option<usize>,

    /// Run the task on the unit or distributor at this address
    #[arg(long, value_name = "HOST:PORT")]
    pub remote: Option<String>,
}

impl RunCommand {
    /// Execute the run command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(task_path = %self.task_path, mode = ?self.mode, "executing run command");
        let config = cli.config()?;
        let meta = parse_meta(self.meta.as_deref())?;

        let mut runner_config = config.runner.clone();
        if let Some(threads) = self.threads {
            runner_config.threads = threads.max(1);
        }
        let mode = self.mode.unwrap_or(runner_config.mode);

        let workspace = match &self.remote {
            Some(_) if mode == ExecutionMode::Process => {
                bail!("remote tasks cannot run in process mode")
            }
            Some(addr) => {
                let io_timeout = Duration::from_secs(config.network.io_timeout_secs);
                RemoteWorkspace::connect_with_timeout(addr, io_timeout)
                    .with_context(|| format!("failed to fetch the structure of {}", addr))?
            }
            None => cli.selected_workspace()?,
        };

        let mut runner = build_runner(&runner_config, Some(mode));
        if cli.verbose && cli.chatty() {
            runner = runner.with_reporter(Arc::new(ConsoleReporter));
        }

        if cli.chatty() {
            output::info(&format!(
                "Running {} in {} ({})",
                style(&self.task_path).bold(),
                workspace.name(),
                mode
            ));
        }

        let result = TaskMaster::new(runner).execute_path(meta, &workspace, &self.task_path)?;
        let (status, report) = settle(result);

        match cli.format {
            OutputFormat::Json => output::json(&report)?,
            OutputFormat::Text => print_report(cli, status, &report),
        }

        let code = exit_codes::for_status(status);
        if code != exit_codes::SUCCESS {
            std::process::exit(code);
        }
        Ok(())
    }
}

/// Parse `--meta`: inline JSON or `@path`
pub(super) fn parse_meta(arg: Option<&str>) -> anyhow::Result<Meta> {
    let Some(arg) = arg else {
        return Ok(Meta::new());
    };
    let text = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read meta file {}", path))?,
        None => arg.to_string(),
    };
    let value: Value = serde_json::from_str(&text).context("meta is not valid JSON")?;
    if !value.is_object() {
        bail!("meta must be a JSON object, got {}", value);
    }
    Ok(Meta::try_from(value)?)
}

/// Force the result and describe it; the status is read after evaluation
fn settle(result: TaskResult) -> (TaskStatus, Value) {
    let status = result.status();
    match status {
        TaskStatus::DependenciesError => {
            let unresolved = result.task_node().all_unresolved();
            (status, json!({"status": status.as_str(), "unresolved": unresolved}))
        }
        TaskStatus::MetaError => {
            let errors = result
                .meta_errors()
                .and_then(|e| serde_json::to_value(e.meta_error.errors()).ok())
                .unwrap_or_else(|| json!([]));
            (status, json!({"status": status.as_str(), "meta_errors": errors}))
        }
        TaskStatus::InvocationError | TaskStatus::ContainsData => match result.into_value() {
            Ok(value) => {
                let status = TaskStatus::ContainsData;
                (status, json!({"status": status.as_str(), "result": value}))
            }
            Err(e) => {
                let status = TaskStatus::InvocationError;
                (status, json!({"status": status.as_str(), "error": e.to_string()}))
            }
        },
    }
}

fn print_report(cli: &Cli, status: TaskStatus, report: &Value) {
    match status {
        TaskStatus::ContainsData => {
            let result = report.get("result").unwrap_or(&Value::Null);
            if cli.quiet {
                println!("{}", output::value(result));
            } else {
                output::success("Task completed");
                println!("{}", output::value(result));
            }
        }
        TaskStatus::DependenciesError => {
            output::error(&format!(
                "{}: unresolved dependencies",
                status_style(status).apply_to(status)
            ));
            for name in report["unresolved"].as_array().into_iter().flatten() {
                eprintln!("  {}", name.as_str().unwrap_or_default());
            }
        }
        TaskStatus::MetaError => {
            output::error(&format!(
                "{}: meta does not match the task specification",
                status_style(status).apply_to(status)
            ));
            for error in report["meta_errors"].as_array().into_iter().flatten() {
                match serde_json::from_value::<MetaFieldError>(error.clone()) {
                    Ok(error) => eprintln!("  {}", error),
                    Err(_) => eprintln!("  {}", error),
                }
            }
        }
        TaskStatus::InvocationError => {
            output::error(&format!(
                "{}: {}",
                status_style(status).apply_to(status),
                report["error"].as_str().unwrap_or_default()
            ));
        }
    }
}

/// Console reporter used with --verbose
struct ConsoleReporter;

impl TaskReporter for ConsoleReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Started { task, workspace } => {
                println!(
                    "  {} {} {}",
                    style("▸").dim(),
                    style(task).bold(),
                    style(format!("({})", workspace)).dim()
                );
            }
            TaskEvent::Completed { task, duration } => {
                println!(
                    "  {} {} {}",
                    style("✓").green(),
                    style(task).green(),
                    style(format!("{:.3}s", duration.as_secs_f64())).dim()
                );
            }
            TaskEvent::Failed {
                task,
                duration,
                error,
            } => {
                println!(
                    "  {} {} {} {}",
                    style("✗").red(),
                    style(task).red(),
                    style(format!("{:.3}s", duration.as_secs_f64())).dim(),
                    style(error).red().dim()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn run(path: &str, meta: Value) -> (TaskStatus, Value) {
        let meta = Meta::try_from(meta).unwrap();
        let result = TaskMaster::default()
            .execute_path(meta, registry::root(), path)
            .unwrap();
        settle(result)
    }

    #[test]
    fn test_parse_meta_inline_and_file() {
        assert!(parse_meta(None).unwrap().is_empty());

        let meta = parse_meta(Some(r#"{"count": 3}"#)).unwrap();
        assert_eq!(meta.get("count"), Some(&json!(3)));

        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"greeting": {{"name": "ada"}}}}"#).unwrap();
        let arg = format!("@{}", file.path().display());
        let meta = parse_meta(Some(&arg)).unwrap();
        assert_eq!(meta.slice("greeting").get("name"), Some(&json!("ada")));
    }

    #[test]
    fn test_parse_meta_rejects_non_objects() {
        assert!(parse_meta(Some("[1, 2]")).is_err());
        assert!(parse_meta(Some("{not json")).is_err());
        assert!(parse_meta(Some("@/definitely/not/here.json")).is_err());
    }

    #[test]
    fn test_settle_reports() {
        let (status, report) = run("double_square", json!({}));
        assert_eq!(status, TaskStatus::ContainsData);
        assert_eq!(report, json!({"status": "contains_data", "result": 8}));

        let (status, report) = run("text.greeting", json!({"name": 7}));
        assert_eq!(status, TaskStatus::MetaError);
        assert_eq!(report["meta_errors"][0]["required_key"], "name");

        let meta = json!({"filter_map_numbers": {"map_numbers": {"numbers": {"count": 1}}}});
        let (status, report) = run("reduce_filter_map_numbers", meta);
        assert_eq!(status, TaskStatus::InvocationError);
        assert_eq!(
            report["error"],
            "reduce of empty sequence with no initial value"
        );
    }
}
