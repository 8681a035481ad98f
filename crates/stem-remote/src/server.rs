//! Accept loop shared by units and distributors

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use stem_core::{Envelope, EnvelopeError};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

/// Answer to one request
pub(crate) struct Reply {
    pub envelope: Envelope,
    /// Stop accepting connections once the reply is written
    pub stop: bool,
}

impl Reply {
    pub fn send(envelope: Envelope) -> Self {
        Self {
            envelope,
            stop: false,
        }
    }

    pub fn send_and_stop(envelope: Envelope) -> Self {
        Self {
            envelope,
            stop: true,
        }
    }
}

impl From<Envelope> for Reply {
    fn from(envelope: Envelope) -> Self {
        Reply::send(envelope)
    }
}

/// A request handler served one connection at a time
pub(crate) trait Service: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn io_timeout(&self) -> Duration;

    fn handle(self: Arc<Self>, request: Envelope) -> BoxFuture<'static, Reply>;
}

/// A server running on a background task
pub struct ServerHandle {
    addr: SocketAddr,
    stop: Arc<watch::Sender<bool>>,
    task: JoinHandle<io::Result<()>>,
}

impl ServerHandle {
    /// The bound address, useful when binding port 0
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting new connections
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Wait for the accept loop to finish
    pub async fn join(self) -> io::Result<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
        }
    }
}

/// Bind `addr` and serve on a background task
pub(crate) async fn spawn<S: Service>(
    service: Arc<S>,
    addr: impl ToSocketAddrs,
) -> io::Result<ServerHandle> {
    let listener = TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;
    let (stop, _) = watch::channel(false);
    let stop = Arc::new(stop);

    let task = tokio::spawn(run(service, listener, Arc::clone(&stop)));
    Ok(ServerHandle { addr, stop, task })
}

/// Accept connections until a handler or the owner signals stop
pub(crate) async fn run<S: Service>(
    service: Arc<S>,
    listener: TcpListener,
    stop: Arc<watch::Sender<bool>>,
) -> io::Result<()> {
    let addr = listener.local_addr()?;
    let mut stopped = stop.subscribe();
    info!(service = service.name(), %addr, "listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                };
                tokio::spawn(handle_connection(
                    Arc::clone(&service),
                    stream,
                    peer,
                    Arc::clone(&stop),
                ));
            }
            changed = stopped.changed() => {
                if changed.is_err() || *stopped.borrow() {
                    break;
                }
            }
        }
    }

    info!(service = service.name(), %addr, "stopped");
    Ok(())
}

#[instrument(skip_all, fields(service = service.name(), %peer))]
async fn handle_connection<S: Service>(
    service: Arc<S>,
    mut stream: TcpStream,
    peer: SocketAddr,
    stop: Arc<watch::Sender<bool>>,
) {
    let deadline = service.io_timeout();

    let reply = match timeout(deadline, Envelope::read_async(&mut stream)).await {
        Ok(Ok(request)) => {
            debug!(command = ?request.meta.get("command"), "request received");
            Arc::clone(&service).handle(request).await
        }
        Ok(Err(e)) => {
            warn!(error = %e, "rejecting malformed request");
            let reply = Envelope::failure(rejection(&e));
            if let Err(e) = write_reply(&mut stream, &reply, deadline).await {
                debug!(error = %e, "could not answer malformed request");
            }
            let _ = stream.shutdown().await;
            return;
        }
        Err(_) => {
            warn!(?deadline, "timed out reading request");
            Reply::send(Envelope::failure(format!(
                "timed out reading request after {:?}",
                deadline
            )))
        }
    };

    if let Err(e) = write_reply(&mut stream, &reply.envelope, deadline).await {
        warn!(error = %e, "failed to write response");
    }
    let _ = stream.shutdown().await;

    if reply.stop {
        info!("stop requested");
        stop.send_replace(true);
    }
}

fn rejection(error: &EnvelopeError) -> String {
    match error {
        EnvelopeError::Malformed(_) => "Not Envelope format".to_string(),
        other => format!("Not Envelope format: {}", other),
    }
}

async fn write_reply(
    stream: &mut TcpStream,
    reply: &Envelope,
    deadline: Duration,
) -> Result<(), EnvelopeError> {
    match timeout(deadline, reply.write_to_async(stream)).await {
        Ok(result) => result,
        Err(_) => Err(EnvelopeError::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            "timed out writing response",
        ))),
    }
}
