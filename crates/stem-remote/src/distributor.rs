//! A distributor fronts several units and forwards work to the strongest
//!
//! `run` and `structure` go to the unit reporting the highest powerfullity
//! (the last one listed wins a tie); `powerfullity` answers with the sum over
//! all reachable units. Each sub-request uses its own connection.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use stem_core::{Envelope, Meta};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::client::{Client, DEFAULT_IO_TIMEOUT};
use crate::command::Command;
use crate::server::{self, Reply, ServerHandle, Service};

/// Dispatches requests to a fixed list of units
pub struct Distributor {
    units: Vec<String>,
    io_timeout: Duration,
}

impl Distributor {
    /// Units are `host:port` addresses, in tie-break order
    pub fn new<I, S>(units: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            units: units.into_iter().map(Into::into).collect(),
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn units(&self) -> &[String] {
        &self.units
    }

    /// Serve on `listener` until the process ends
    pub async fn serve(self, listener: TcpListener) -> io::Result<()> {
        let (stop, _) = watch::channel(false);
        server::run(Arc::new(self), listener, Arc::new(stop)).await
    }

    /// Bind `addr` and serve on a background task
    pub async fn spawn(self, addr: impl ToSocketAddrs) -> io::Result<ServerHandle> {
        server::spawn(Arc::new(self), addr).await
    }

    fn client(&self, addr: &str) -> Client {
        Client::new(addr).with_timeout(self.io_timeout)
    }

    /// Powerfullity of every unit that answers, in list order
    async fn survey(&self) -> Vec<(&str, u64)> {
        let mut reports = Vec::with_capacity(self.units.len());
        for unit in &self.units {
            match self.client(unit).powerfullity().await {
                Ok(powerfullity) => {
                    debug!(unit = %unit, powerfullity, "unit reported");
                    reports.push((unit.as_str(), powerfullity));
                }
                Err(e) => warn!(unit = %unit, error = %e, "unit did not report powerfullity"),
            }
        }
        reports
    }

    /// The unit with the highest powerfullity; the last of equal maxima wins
    #[instrument(skip(self))]
    async fn select_unit(&self) -> Option<String> {
        let mut best: Option<(&str, u64)> = None;
        for (unit, powerfullity) in self.survey().await {
            if best.map_or(true, |(_, top)| powerfullity >= top) {
                best = Some((unit, powerfullity));
            }
        }
        best.map(|(unit, powerfullity)| {
            info!(unit, powerfullity, "selected unit");
            unit.to_string()
        })
    }

    async fn forward(&self, request: Envelope) -> Envelope {
        let Some(unit) = self.select_unit().await else {
            return Envelope::failure("no units available");
        };
        match self.client(&unit).send(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(unit = %unit, error = %e, "forwarding failed");
                Envelope::failure(format!("unit {} failed: {}", unit, e))
            }
        }
    }

    async fn total_powerfullity(&self) -> Envelope {
        let reports = self.survey().await;
        if reports.is_empty() {
            return Envelope::failure("no units available");
        }
        let total: u64 = reports.iter().map(|(_, p)| p).sum();
        Envelope::success(Meta::new().with("powerfullity", total))
    }

    async fn dispatch(self: Arc<Self>, request: Envelope) -> Reply {
        let command = match Command::from_meta(&request.meta) {
            Ok(command) => command,
            Err(error) => return Envelope::failure(error).into(),
        };

        match command {
            Command::Run if !request.meta.contains_key("task_path") => {
                Envelope::failure("KeyError: task_path").into()
            }
            Command::Run | Command::Structure => self.forward(request).await.into(),
            Command::Powerfullity => self.total_powerfullity().await.into(),
            Command::Stop => Envelope::failure("unknown command: stop").into(),
        }
    }
}

impl Service for Distributor {
    fn name(&self) -> &'static str {
        "distributor"
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
    use crate::unit::Unit;
    use serde_json::json;
    use stem_core::{source, Workspace};

    async fn unit(name: &str, powerfullity: u64) -> ServerHandle {
        let workspace = Workspace::builder(name)
            .task(source("whoami", {
                let name = name.to_string();
                move |_| Ok(name.clone())
            }))
            .build();
        Unit::new(workspace)
            .with_powerfullity(powerfullity)
            .spawn("127.0.0.1:0")
            .await
            .unwrap()
    }

    async fn dead_address() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    }

    async fn distributor(units: Vec<String>) -> (ServerHandle, Client) {
        let handle = Distributor::new(units)
            .with_io_timeout(Duration::from_secs(5))
            .spawn("127.0.0.1:0")
            .await
            .unwrap();
        let client = Client::new(handle.addr().to_string());
        (handle, client)
    }

    #[tokio::test]
    async fn test_powerfullity_of_single_unit() {
        let unit = unit("alpha", 5).await;
        let (_handle, client) = distributor(vec![unit.addr().to_string()]).await;

        let response = client
            .send(&Envelope::new(Command::Powerfullity.request()))
            .await
            .unwrap();
        assert_eq!(
            response.meta.into_value(),
            json!({"status": "success", "powerfullity": 5})
        );
    }

    #[tokio::test]
    async fn test_powerfullity_is_summed_and_skips_dead_units() {
        let a = unit("alpha", 2).await;
        let b = unit("beta", 3).await;
        let units = vec![a.addr().to_string(), dead_address().await, b.addr().to_string()];
        let (_handle, client) = distributor(units).await;

        assert_eq!(client.powerfullity().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_run_goes_to_strongest_unit() {
        let weak = unit("weak", 1).await;
        let strong = unit("strong", 9).await;
        let (_handle, client) =
            distributor(vec![strong.addr().to_string(), weak.addr().to_string()]).await;

        let result = client.run("whoami", Meta::new(), Vec::new()).await.unwrap();
        assert_eq!(result, json!(["strong"]));
    }

    #[tokio::test]
    async fn test_tie_goes_to_last_unit() {
        let first = unit("first", 4).await;
        let second = unit("second", 4).await;
        let (_handle, client) =
            distributor(vec![first.addr().to_string(), second.addr().to_string()]).await;

        let structure = client.structure().await.unwrap();
        assert_eq!(structure.name, "second");
    }

    #[tokio::test]
    async fn test_unit_failures_are_relayed() {
        let unit = unit("alpha", 1).await;
        let (_handle, client) = distributor(vec![unit.addr().to_string()]).await;

        let err = client.run("missing", Meta::new(), Vec::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "task not found: missing");
    }

    #[tokio::test]
    async fn test_no_units_available() {
        let (_handle, client) = distributor(vec![dead_address().await]).await;
        let err = client.structure().await.unwrap_err();
        assert_eq!(err.to_string(), "no units available");
    }

    #[tokio::test]
    async fn test_missing_command() {
        let (_handle, client) = distributor(Vec::new()).await;
        let response = client.send(&Envelope::new(Meta::new())).await.unwrap();
        assert_eq!(response.error(), Some("KeyError: command"));
    }
}
