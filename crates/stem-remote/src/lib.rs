//! Stem Remote - serve workspaces over TCP
//!
//! A [`Unit`] exposes one workspace; a [`Distributor`] forwards requests to
//! the unit with the highest reported powerfullity. Both speak the envelope
//! protocol from `stem_core::envelope`, one request per connection.

pub mod client;
pub mod command;
pub mod distributor;
pub mod error;
pub mod remote_workspace;
mod server;
pub mod unit;

pub use client::{Client, DEFAULT_IO_TIMEOUT};
pub use command::Command;
pub use distributor::Distributor;
pub use error::{RemoteError, Result};
pub use remote_workspace::{RemoteTask, RemoteWorkspace};
pub use server::ServerHandle;
pub use unit::Unit;
