//! One-request-per-connection clients
//!
//! Every call opens a fresh connection, writes one envelope, reads one
//! envelope and closes. Connect, write and read each run under the client's
//! deadline.

use std::io;
use std::net::{TcpStream as StdTcpStream, ToSocketAddrs};
use std::time::Duration;

use serde_json::Value;
use stem_core::{Envelope, EnvelopeError, Meta, WorkspaceStructure};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, instrument};

use crate::command::Command;
use crate::error::{RemoteError, Result};

/// Default deadline for each socket operation
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for a unit or distributor at `host:port`
#[derive(Debug, Clone)]
pub struct Client {
    addr: String,
    io_timeout: Duration,
}

impl Client {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send one envelope and return the raw response
    #[instrument(skip_all, fields(addr = %self.addr))]
    pub async fn send(&self, request: &Envelope) -> Result<Envelope> {
        let deadline = self.io_timeout;
        let mut stream = timeout(deadline, TcpStream::connect(self.addr.as_str()))
            .await
            .map_err(|_| RemoteError::Timeout(deadline))??;

        timeout(deadline, request.write_to_async(&mut stream))
            .await
            .map_err(|_| RemoteError::Timeout(deadline))??;

        let response = timeout(deadline, Envelope::read_async(&mut stream))
            .await
            .map_err(|_| RemoteError::Timeout(deadline))??;
        debug!(status = ?response.meta.get("status"), "response received");
        Ok(response)
    }

    /// Blocking variant of [`Client::send`]
    pub fn send_blocking(&self, request: &Envelope) -> Result<Envelope> {
        let deadline = self.io_timeout;
        let mut stream = self.connect_blocking()?;
        stream.set_read_timeout(Some(deadline))?;
        stream.set_write_timeout(Some(deadline))?;

        request
            .write_to(&mut stream)
            .map_err(|e| blocking_error(e, deadline))?;
        Envelope::read(&mut stream).map_err(|e| blocking_error(e, deadline))
    }

    fn connect_blocking(&self) -> Result<StdTcpStream> {
        let mut last_error = None;
        for addr in self.addr.to_socket_addrs()? {
            match StdTcpStream::connect_timeout(&addr, self.io_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    last_error = Some(RemoteError::Timeout(self.io_timeout));
                }
                Err(e) => last_error = Some(RemoteError::Io(e)),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            RemoteError::Io(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no address found for {}", self.addr),
            ))
        }))
    }

    /// Send and require a `success` status
    pub async fn request(&self, request: &Envelope) -> Result<Envelope> {
        expect_success(self.send(request).await?)
    }

    pub fn request_blocking(&self, request: &Envelope) -> Result<Envelope> {
        expect_success(self.send_blocking(request)?)
    }

    /// Reported capacity of the peer
    pub async fn powerfullity(&self) -> Result<u64> {
        let response = self.request(&Envelope::new(Command::Powerfullity.request())).await?;
        response
            .meta
            .get("powerfullity")
            .and_then(Value::as_u64)
            .ok_or_else(|| RemoteError::MissingKey("powerfullity".to_string()))
    }

    pub async fn structure(&self) -> Result<WorkspaceStructure> {
        let response = self.request(&Envelope::new(Command::Structure.request())).await?;
        parse_structure(&response)
    }

    pub fn structure_blocking(&self) -> Result<WorkspaceStructure> {
        let response = self.request_blocking(&Envelope::new(Command::Structure.request()))?;
        parse_structure(&response)
    }

    /// Run a task remotely and return its `task_result`
    pub async fn run(&self, task_path: &str, task_meta: Meta, data: Vec<u8>) -> Result<Value> {
        let response = self.request(&run_request(task_path, task_meta, data)?).await?;
        task_result(response)
    }

    pub fn run_blocking(&self, task_path: &str, task_meta: Meta, data: Vec<u8>) -> Result<Value> {
        let response = self.request_blocking(&run_request(task_path, task_meta, data)?)?;
        task_result(response)
    }

    /// Ask a unit to shut down
    pub async fn stop(&self) -> Result<()> {
        self.request(&Envelope::new(Command::Stop.request())).await?;
        Ok(())
    }
}

fn run_request(task_path: &str, task_meta: Meta, data: Vec<u8>) -> Result<Envelope> {
    let meta = Command::Run
        .request()
        .with("task_path", task_path)
        .with("task_meta", task_meta.into_value());
    Ok(Envelope::with_data(meta, data)?)
}

fn expect_success(response: Envelope) -> Result<Envelope> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(RemoteError::failed(
            response.error().unwrap_or("request failed without an error message"),
        ))
    }
}

fn parse_structure(response: &Envelope) -> Result<WorkspaceStructure> {
    let structure = response
        .meta
        .get("structure")
        .cloned()
        .ok_or_else(|| RemoteError::MissingKey("structure".to_string()))?;
    serde_json::from_value(structure).map_err(|e| RemoteError::Envelope(EnvelopeError::Meta(e)))
}

fn task_result(mut response: Envelope) -> Result<Value> {
    response
        .meta
        .remove("task_result")
        .ok_or_else(|| RemoteError::MissingKey("task_result".to_string()))
}

fn blocking_error(error: EnvelopeError, deadline: Duration) -> RemoteError {
    match error {
        EnvelopeError::Io(e)
            if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
        {
            RemoteError::Timeout(deadline)
        }
        other => RemoteError::Envelope(other),
    }
}
