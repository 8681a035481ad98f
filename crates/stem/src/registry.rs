//! Built-in workspaces served and run by the CLI
//!
//! `stem worker` children resolve tasks here by workspace name, so the
//! registry must be identical in every process started from this binary.

use std::sync::{Arc, OnceLock};

use anyhow::anyhow;
use serde_json::{json, Value};
use stem_core::{
    locate_workspace, source, task, FilterTask, FnTask, MapTask, Meta, MetaType, Output,
    ReduceTask, SourceTask, Specification, Task, Workspace,
};

/// Name of the root workspace
pub const DEFAULT_WORKSPACE: &str = "demo";

static ROOT: OnceLock<Arc<Workspace>> = OnceLock::new();

/// The root of the registry
pub fn root() -> &'static Arc<Workspace> {
    ROOT.get_or_init(demo)
}

/// Find a registered workspace by name
pub fn lookup(name: &str) -> Option<Arc<Workspace>> {
    locate_workspace(root(), name)
}

fn demo() -> Arc<Workspace> {
    let echo: Arc<dyn Task> = Arc::new(FnTask::new("echo", |meta, _| {
        Ok(Output::value(meta.get_or("input", Value::Null)))
    }));

    Workspace::builder(DEFAULT_WORKSPACE)
        .task(source("square", |_| Ok(4)))
        .task(task("double_square", &["square"], |_, mut inputs| {
            let square = integer(&inputs.value("square")?)?;
            Ok(Output::value(square * 2))
        }))
        .task(Arc::new(SourceTask::new("numbers", |meta| {
            let count = meta.get("count").and_then(Value::as_i64).unwrap_or(10);
            Ok(Output::seq((1..=count).map(Value::from)))
        })))
        .task(Arc::new(MapTask::new(square_value, "numbers")))
        .task(Arc::new(FilterTask::new(
            |v| v.as_i64().is_some_and(|n| n % 2 == 0),
            "map_numbers",
        )))
        .task(Arc::new(ReduceTask::new(sum_values, "filter_map_numbers")))
        .task(echo)
        .workspace(text())
        .build()
}

// Both saturate so large counts from meta cannot overflow
fn square_value(v: Value) -> Value {
    json!(v.as_i64().unwrap_or(0).saturating_pow(2))
}

fn sum_values(a: Value, b: Value) -> Value {
    json!(a.as_i64().unwrap_or(0).saturating_add(b.as_i64().unwrap_or(0)))
}

fn text() -> Arc<Workspace> {
    let greeting: Arc<dyn Task> = Arc::new(
        FnTask::with_settings_fn("greeting", |settings, meta, _| {
            let salutation = settings
                .get("salutation")
                .and_then(Value::as_str)
                .unwrap_or("Hello");
            let name = meta.get("name").and_then(Value::as_str).unwrap_or_default();
            Ok(Output::value(format!("{}, {}", salutation, name)))
        })
        .with_settings(Meta::new().with("salutation", "Hello"))
        .with_specification(Specification::field("name", MetaType::String)),
    );

    Workspace::builder("text")
        .task(greeting)
        .task(task("shout", &["greeting"], |_, mut inputs| {
            let greeting = inputs.value("greeting")?;
            let greeting = greeting
                .as_str()
                .ok_or_else(|| anyhow!("greeting is not a string: {}", greeting))?;
            Ok(Output::value(greeting.to_uppercase()))
        }))
        .build()
}

fn integer(value: &Value) -> anyhow::Result<i64> {
    value
        .as_i64()
        .ok_or_else(|| anyhow!("expected an integer, got {}", value))
}
