//! Output formatting utilities

use console::{style, Style};
use serde_json::Value;
use stem_core::TaskStatus;

/// Print a success message
pub fn success(message: &str) {
    println!("{} {}", style("✓").green().bold(), message);
}

/// Print an error message
pub fn error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), message);
}

/// Print a warning message
pub fn warning(message: &str) {
    println!("{} {}", style("!").yellow().bold(), message);
}

/// Print an info message
pub fn info(message: &str) {
    println!("{} {}", style("→").blue(), message);
}

/// Create a styled header
pub fn header(text: &str) -> String {
    style(text).bold().to_string()
}

/// Create a styled key-value line
pub fn key_value(key: &str, value: &str) -> String {
    format!("  {}: {}", style(key).dim(), value)
}

/// Style for task names
pub fn task_style() -> Style {
    Style::new().cyan()
}

/// Style for workspace names
pub fn workspace_style() -> Style {
    Style::new().magenta().bold()
}

/// Style for a task status
pub fn status_style(status: TaskStatus) -> Style {
    match status {
        TaskStatus::ContainsData => Style::new().green(),
        TaskStatus::MetaError | TaskStatus::DependenciesError => Style::new().yellow(),
        TaskStatus::InvocationError => Style::new().red(),
    }
}

/// Render a JSON value for the terminal: strings bare, everything else pretty-printed
pub fn value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Print a JSON document to stdout
pub fn json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_rendering() {
        assert_eq!(value(&json!("plain")), "plain");
        assert_eq!(value(&json!(8)), "8");
        assert_eq!(value(&json!([1, 2])), "[\n  1,\n  2\n]");
    }
}
