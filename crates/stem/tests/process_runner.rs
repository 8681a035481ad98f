//! Drives the process runner through the compiled `stem worker` subcommand

use std::process::Command;
use std::sync::Arc;

use serde_json::{json, Value};
use stem_core::{
    source, task, Meta, Output, ProcessRunner, TaskMaster, TaskStatus, WorkerCommand, Workspace,
};

fn worker() -> WorkerCommand {
    WorkerCommand::new(env!("CARGO_BIN_EXE_stem")).arg("worker")
}

/// A local twin of the built-in `demo` workspace whose `square` lies.
///
/// Workers resolve tasks by name in the binary's own registry, so a result of
/// 8 proves the dependency ran in a child process.
fn demo_twin() -> Arc<Workspace> {
    Workspace::builder("demo")
        .task(source("square", |_| Ok(-1)))
        .task(task("double_square", &["square"], |_, mut inputs| {
            let square = inputs.value("square")?.as_i64().unwrap_or(0);
            Ok(Output::value(square * 2))
        }))
        .task(source("ghost", |_| Ok(0)))
        .task(task("haunted", &["ghost"], |_, _| Ok(Output::value(0))))
        .build()
}

#[test]
fn test_dependencies_run_in_worker_processes() {
    let master = TaskMaster::new(ProcessRunner::new(worker()).with_workers(2));
    let result = master
        .execute_path(Meta::new(), &demo_twin(), "double_square")
        .unwrap();

    assert_eq!(result.into_value().unwrap(), json!(8));
}

#[test]
fn test_worker_errors_become_invocation_errors() {
    let master = TaskMaster::new(ProcessRunner::new(worker()));
    let result = master
        .execute_path(Meta::new(), &demo_twin(), "haunted")
        .unwrap();

    let err = result.data().unwrap_err();
    assert_eq!(err.to_string(), "task not found: ghost");
    assert_eq!(result.status(), TaskStatus::InvocationError);
}

#[test]
fn test_run_command_in_process_mode() {
    let output = Command::new(env!("CARGO_BIN_EXE_stem"))
        .args([
            "--format",
            "json",
            "run",
            "reduce_filter_map_numbers",
            "--mode",
            "process",
            "--meta",
            r#"{"filter_map_numbers": {"map_numbers": {"numbers": {"count": 4}}}}"#,
        ])
        .output()
        .unwrap();

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let report: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report, json!({"status": "contains_data", "result": 20}));
}

#[test]
fn test_run_command_exit_codes() {
    let output = Command::new(env!("CARGO_BIN_EXE_stem"))
        .args(["-q", "-w", "text", "run", "greeting"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));

    let output = Command::new(env!("CARGO_BIN_EXE_stem"))
        .args(["-q", "run", "nothing_here"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("task not found: nothing_here"));
}
