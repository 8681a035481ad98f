//! Task execution reporting

use std::sync::Mutex;
use std::time::Duration;

/// Events emitted while a runner executes a node
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// A task's transform is about to run
    Started { task: String, workspace: String },
    /// A transform returned a result
    Completed { task: String, duration: Duration },
    /// A transform returned an error
    Failed {
        task: String,
        duration: Duration,
        error: String,
    },
}

impl TaskEvent {
    pub fn task(&self) -> &str {
        match self {
            TaskEvent::Started { task, .. }
            | TaskEvent::Completed { task, .. }
            | TaskEvent::Failed { task, .. } => task,
        }
    }
}

/// Trait for reporting task execution progress
pub trait TaskReporter: Send + Sync {
    /// Handle a task event
    fn report(&self, event: &TaskEvent);
}

/// Simple reporter that logs to tracing
#[derive(Debug, Default)]
pub struct TracingReporter;

impl TaskReporter for TracingReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::Started { task, workspace } => {
                tracing::debug!("Starting {} in {}", task, workspace);
            }
            TaskEvent::Completed { task, duration } => {
                tracing::info!("{} completed in {:.3}s", task, duration.as_secs_f64());
            }
            TaskEvent::Failed {
                task,
                duration,
                error,
            } => {
                tracing::error!("{} failed after {:.3}s: {}", task, duration.as_secs_f64(), error);
            }
        }
    }
}

/// Reporter that collects events for later inspection (useful for testing)
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<TaskEvent>>,
}

impl CollectingReporter {
    /// Get all collected events
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Names of tasks that completed, in completion order
    pub fn completed(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, TaskEvent::Completed { .. }))
            .map(|e| e.task().to_string())
            .collect()
    }
}

impl TaskReporter for CollectingReporter {
    fn report(&self, event: &TaskEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_reporter() {
        let reporter = CollectingReporter::default();

        reporter.report(&TaskEvent::Started {
            task: "square".to_string(),
            workspace: "demo".to_string(),
        });
        reporter.report(&TaskEvent::Completed {
            task: "square".to_string(),
            duration: Duration::from_millis(5),
        });

        assert_eq!(reporter.events().len(), 2);
        assert_eq!(reporter.completed(), vec!["square".to_string()]);
    }

    #[test]
    fn test_tracing_reporter() {
        let reporter = TracingReporter;

        // Just verify it doesn't panic
        reporter.report(&TaskEvent::Failed {
            task: "square".to_string(),
            duration: Duration::from_secs(1),
            error: "boom".to_string(),
        });
    }
}
