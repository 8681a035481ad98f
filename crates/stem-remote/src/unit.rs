//! A unit serves one workspace over TCP
//!
//! Commands: `run`, `structure`, `powerfullity` and `stop`. Every request is
//! answered with exactly one envelope whose `status` is `success` or
//! `failed`.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use stem_core::{Envelope, Meta, Runner, TaskMaster, TaskStatus, Workspace};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::client::DEFAULT_IO_TIMEOUT;
use crate::command::Command;
use crate::server::{self, Reply, ServerHandle, Service};

/// Serves the tasks of one workspace
pub struct Unit {
    workspace: Arc<Workspace>,
    master: TaskMaster,
    powerfullity: u64,
    io_timeout: Duration,
}

impl Unit {
    /// A unit executing sequentially with capacity 1
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self {
            workspace,
            master: TaskMaster::default(),
            powerfullity: 1,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    pub fn with_powerfullity(mut self, powerfullity: u64) -> Self {
        self.powerfullity = powerfullity;
        self
    }

    pub fn with_runner(mut self, runner: impl Into<Runner>) -> Self {
        self.master = TaskMaster::new(runner);
        self
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    pub fn powerfullity(&self) -> u64 {
        self.powerfullity
    }

    /// Serve on `listener` until a `stop` request arrives
    pub async fn serve(self, listener: TcpListener) -> io::Result<()> {
        let (stop, _) = watch::channel(false);
        server::run(Arc::new(self), listener, Arc::new(stop)).await
    }

    /// Bind `addr` and serve on a background task
    pub async fn spawn(self, addr: impl ToSocketAddrs) -> io::Result<ServerHandle> {
        server::spawn(Arc::new(self), addr).await
    }

    async fn dispatch(self: Arc<Self>, request: Envelope) -> Reply {
        let command = match Command::from_meta(&request.meta) {
            Ok(command) => command,
            Err(error) => {
                debug!(%error, "rejecting request");
                return Envelope::failure(error).into();
            }
        };

        match command {
            Command::Run => self.run(request).await.into(),
            Command::Structure => match serde_json::to_value(self.workspace.structure()) {
                Ok(structure) => Envelope::success(Meta::new().with("structure", structure)).into(),
                Err(e) => Envelope::failure(e.to_string()).into(),
            },
            Command::Powerfullity => {
                Envelope::success(Meta::new().with("powerfullity", self.powerfullity)).into()
            }
            Command::Stop => {
                info!(workspace = self.workspace.name(), "stopping unit");
                Reply::send_and_stop(Envelope::success(Meta::new()))
            }
        }
    }

    async fn run(self: Arc<Self>, request: Envelope) -> Envelope {
        let task_path = match request.meta.get("task_path").and_then(Value::as_str) {
            Some(path) => path.to_string(),
            None => return Envelope::failure("KeyError: task_path"),
        };

        let meta = match task_meta(&request) {
            Ok(meta) => meta,
            Err(error) => return Envelope::failure(error),
        };

        match tokio::task::spawn_blocking(move || self.execute(&task_path, meta)).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "task execution panicked");
                Envelope::failure(format!("task execution aborted: {}", e))
            }
        }
    }

    /// Resolve and execute a task, materialising its result as a list
    #[instrument(skip(self, meta), fields(workspace = self.workspace.name()))]
    fn execute(&self, task_path: &str, meta: Meta) -> Envelope {
        let Some(task) = self.workspace.find_task(task_path) else {
            return Envelope::failure(format!("task not found: {}", task_path));
        };

        let result = self.master.execute(meta, &task, None);
        match result.status() {
            TaskStatus::DependenciesError => Envelope::failure(format!(
                "unresolved dependencies: {}",
                result.task_node().all_unresolved().join(", ")
            )),
            TaskStatus::MetaError => {
                let errors = result
                    .meta_errors()
                    .map(|e| serde_json::to_value(e.meta_error.errors()))
                    .transpose()
                    .unwrap_or_default()
                    .unwrap_or_else(|| Value::Array(Vec::new()));
                let mut response = Envelope::failure("metadata error");
                response.meta.update("meta_errors", errors);
                response
            }
            TaskStatus::InvocationError | TaskStatus::ContainsData => match result.into_output() {
                Ok(output) => Envelope::success(
                    Meta::new().with("task_result", Value::Array(output.into_sequence())),
                ),
                Err(e) => Envelope::failure(e.to_string()),
            },
        }
    }
}

/// The meta a `run` request executes with.
///
/// A non-empty payload must be JSON; it is exposed under `input` unless the
/// request's `task_meta` already sets that key.
fn task_meta(request: &Envelope) -> Result<Meta, String> {
    let mut meta = request.meta.slice("task_meta");
    if !request.data.is_empty() && !meta.contains_key("input") {
        let input: Value = serde_json::from_slice(&request.data)
            .map_err(|e| format!("payload is not valid JSON: {}", e))?;
        meta.update("input", input);
    }
    Ok(meta)
}

impl Service for Unit {
    fn name(&self) -> &'static str {
        "unit"
    }

    fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    fn handle(self: Arc<Self>, request: Envelope) -> BoxFuture<'static, Reply> {
        self.dispatch(request).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use serde_json::json;
    use stem_core::envelope::HEADER_LEN;
    use stem_core::{source, task, FnTask, MetaType, Output, Specification, Task};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn squares() -> Arc<Workspace> {
        let needs_flag: Arc<dyn Task> = Arc::new(
            FnTask::new("needs_flag", |meta, _| Ok(Output::value(meta.get_or("flag", json!(false)))))
                .with_specification(Specification::field("flag", MetaType::Bool)),
        );
        let echo: Arc<dyn Task> = Arc::new(FnTask::new("echo", |meta, _| {
            Ok(Output::value(meta.get_or("input", Value::Null)))
        }));

        Workspace::builder("squares")
            .task(source("square", |_| Ok(4)))
            .task(task("double_square", &["square"], |_, mut inputs| {
                let square = inputs.value("square")?.as_i64().unwrap_or(0);
                Ok(Output::value(square * 2))
            }))
            .task(source("digits", |_| Ok(json!([1, 2, 3]))))
            .task(task("orphan", &["nowhere"], |_, _| Ok(Output::value(0))))
            .task(needs_flag)
            .task(echo)
            .build()
    }

    async fn unit() -> (ServerHandle, Client) {
        let handle = Unit::new(squares())
            .with_powerfullity(5)
            .spawn("127.0.0.1:0")
            .await
            .unwrap();
        let client = Client::new(handle.addr().to_string()).with_timeout(Duration::from_secs(5));
        (handle, client)
    }

    #[tokio::test]
    async fn test_missing_command() {
        let (_handle, client) = unit().await;
        let response = client.send(&Envelope::new(Meta::new())).await.unwrap();
        assert_eq!(
            response.meta.into_value(),
            json!({"status": "failed", "error": "KeyError: command"})
        );
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let (_handle, client) = unit().await;
        let response = client
            .send(&Envelope::new(Meta::new().with("command", "dance")))
            .await
            .unwrap();
        assert_eq!(response.error(), Some("unknown command: dance"));
    }

    #[tokio::test]
    async fn test_powerfullity() {
        let (_handle, client) = unit().await;
        assert_eq!(client.powerfullity().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_structure() {
        let (_handle, client) = unit().await;
        let structure = client.structure().await.unwrap();
        assert_eq!(structure.name, "squares");
        assert_eq!(structure.tasks[..2], ["square", "double_square"]);
    }

    #[tokio::test]
    async fn test_run_wraps_scalar_results() {
        let (_handle, client) = unit().await;
        let result = client.run("double_square", Meta::new(), Vec::new()).await.unwrap();
        assert_eq!(result, json!([8]));
    }

    #[tokio::test]
    async fn test_run_keeps_sequences() {
        let (_handle, client) = unit().await;
        let result = client.run("digits", Meta::new(), Vec::new()).await.unwrap();
        assert_eq!(result, json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn test_run_errors() {
        let (_handle, client) = unit().await;

        let err = client.run("cube", Meta::new(), Vec::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "task not found: cube");

        let err = client.run("orphan", Meta::new(), Vec::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "unresolved dependencies: orphan->nowhere");

        let response = client
            .send(&Envelope::new(Command::Run.request()))
            .await
            .unwrap();
        assert_eq!(response.error(), Some("KeyError: task_path"));
    }

    #[tokio::test]
    async fn test_run_meta_error_lists_fields() {
        let (_handle, client) = unit().await;
        let request = Command::Run
            .request()
            .with("task_path", "needs_flag")
            .with("task_meta", json!({"flag": "yes"}));
        let response = client.send(&Envelope::new(request)).await.unwrap();

        assert_eq!(response.error(), Some("metadata error"));
        let errors = response.meta.get("meta_errors").unwrap();
        assert_eq!(errors[0]["required_key"], "flag");
        assert_eq!(errors[0]["presented_value"], "yes");
    }

    #[tokio::test]
    async fn test_run_with_task_meta_and_payload() {
        let (_handle, client) = unit().await;

        let meta = Meta::new().with("flag", true);
        let result = client.run("needs_flag", meta, Vec::new()).await.unwrap();
        assert_eq!(result, json!([true]));

        let result = client
            .run("echo", Meta::new(), br#"{"x": 1}"#.to_vec())
            .await
            .unwrap();
        assert_eq!(result, json!([{"x": 1}]));

        let err = client
            .run("echo", Meta::new(), b"not json".to_vec())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("payload is not valid JSON"));
    }

    #[tokio::test]
    async fn test_malformed_request_is_rejected() {
        let (handle, _client) = unit().await;
        let mut stream = TcpStream::connect(handle.addr()).await.unwrap();
        stream.write_all(&[b'x'; HEADER_LEN]).await.unwrap();

        let response = Envelope::read_async(&mut stream).await.unwrap();
        assert_eq!(response.error(), Some("Not Envelope format"));

        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_stop_command_ends_server() {
        let (handle, client) = unit().await;
        client.stop().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap()
            .unwrap();
    }
}
