//! Local proxies for tasks served by a unit or distributor

use std::sync::Arc;
use std::time::Duration;

use stem_core::{Inputs, Meta, Output, Task, TaskPath, Workspace, WorkspaceStructure};
use tracing::debug;

use crate::client::{Client, DEFAULT_IO_TIMEOUT};
use crate::error::Result;

/// A task executed by a remote peer.
///
/// The transform sends its meta as `task_meta` and returns the remote
/// `task_result`. Dependencies are resolved on the remote side, so the proxy
/// declares none.
pub struct RemoteTask {
    client: Client,
    task_path: String,
}

impl RemoteTask {
    pub fn new(client: Client, task_path: impl Into<String>) -> Self {
        Self {
            client,
            task_path: task_path.into(),
        }
    }

    pub fn task_path(&self) -> &str {
        &self.task_path
    }
}

impl Task for RemoteTask {
    fn name(&self) -> String {
        TaskPath::new(&self.task_path).name().to_string()
    }

    fn transform(&self, meta: &Meta, _inputs: Inputs) -> anyhow::Result<Output> {
        debug!(addr = self.client.addr(), task_path = %self.task_path, "running remote task");
        let value = self
            .client
            .run_blocking(&self.task_path, meta.clone(), Vec::new())?;
        Ok(Output::Value(value))
    }
}

/// Builds local workspaces mirroring a remote structure
pub struct RemoteWorkspace;

impl RemoteWorkspace {
    /// Fetch the structure at `addr` and mirror it (blocking)
    pub fn connect(addr: &str) -> Result<Arc<Workspace>> {
        Self::connect_with_timeout(addr, DEFAULT_IO_TIMEOUT)
    }

    pub fn connect_with_timeout(addr: &str, io_timeout: Duration) -> Result<Arc<Workspace>> {
        let client = Client::new(addr).with_timeout(io_timeout);
        let structure = client.structure_blocking()?;
        Ok(Self::from_structure(&structure, &client))
    }

    /// Mirror `structure`; every task becomes a [`RemoteTask`] addressed by its dotted path
    pub fn from_structure(structure: &WorkspaceStructure, client: &Client) -> Arc<Workspace> {
        Self::build(structure, client, &[])
    }

    fn build(structure: &WorkspaceStructure, client: &Client, prefix: &[String]) -> Arc<Workspace> {
        let mut builder = Workspace::builder(structure.name.clone());

        for name in &structure.tasks {
            let mut segments = prefix.to_vec();
            segments.push(name.clone());
            let path = TaskPath::from_segments(segments).to_string();
            builder = builder.task(Arc::new(RemoteTask::new(client.clone(), path)));
        }

        for child in &structure.workspaces {
            let mut child_prefix = prefix.to_vec();
            child_prefix.push(child.name.clone());
            builder = builder.workspace(Self::build(child, client, &child_prefix));
        }

        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::Unit;
    use serde_json::json;
    use stem_core::{source, task, TaskMaster, TaskStatus};

    fn local() -> Arc<Workspace> {
        let numbers = Workspace::builder("numbers")
            .task(source("square", |_| Ok(4)))
            .task(task("double_square", &["square"], |_, mut inputs| {
                let square = inputs.value("square")?.as_i64().unwrap_or(0);
                Ok(Output::value(square * 2))
            }))
            .build();
        Workspace::builder("root")
            .task(source("scaled", |meta| {
                Ok(meta.get("n").and_then(|v| v.as_i64()).unwrap_or(0) * 10)
            }))
            .workspace(numbers)
            .build()
    }

    #[test]
    fn test_from_structure_keeps_dotted_paths() {
        let client = Client::new("127.0.0.1:1");
        let mirror = RemoteWorkspace::from_structure(&local().structure(), &client);

        assert_eq!(mirror.structure(), local().structure());
        let task = mirror.find_task("numbers.double_square").unwrap();
        assert_eq!(task.name(), "double_square");
        assert!(task.dependencies().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_remote_tasks_run_through_task_master() {
        let handle = Unit::new(local()).spawn("127.0.0.1:0").await.unwrap();
        let addr = handle.addr().to_string();

        let (double_square, scaled) = tokio::task::spawn_blocking(move || {
            let mirror = RemoteWorkspace::connect(&addr).unwrap();
            let master = TaskMaster::default();

            let double_square = master
                .execute_path(Meta::new(), &mirror, "numbers.double_square")
                .unwrap();
            assert_eq!(double_square.status(), TaskStatus::ContainsData);

            let scaled = master
                .execute_path(Meta::new().with("n", 3), &mirror, "scaled")
                .unwrap();
            (double_square.into_value().unwrap(), scaled.into_value().unwrap())
        })
        .await
        .unwrap();

        assert_eq!(double_square, json!([8]));
        assert_eq!(scaled, json!([30]));
    }

    #[test]
    fn test_unreachable_peer_is_invocation_error() {
        let remote: Arc<dyn Task> = Arc::new(RemoteTask::new(
            Client::new("127.0.0.1:1").with_timeout(Duration::from_millis(200)),
            "numbers.square",
        ));
        let result = TaskMaster::default().execute(Meta::new(), &remote, None);
        assert!(result.data().is_err());
        assert_eq!(result.status(), TaskStatus::InvocationError);
    }
}
