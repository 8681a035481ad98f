//! Worker command, the child side of the process runner

use std::io::{self, Write};

use clap::Args;
use stem_core::runner::serve_worker;
use tracing::debug;

use crate::cli::Cli;
use crate::registry;

/// Answer one process-runner request on stdin/stdout
#[derive(Debug, Args)]
pub struct WorkerCommand {}

impl WorkerCommand {
    /// Execute the worker command
    pub fn execute(&self, _cli: &Cli) -> anyhow::Result<()> {
        debug!(pid = std::process::id(), "worker started");
        let mut reader = io::stdin().lock();
        let mut writer = io::stdout().lock();
        serve_worker(registry::lookup, &mut reader, &mut writer)?;
        writer.flush()?;
        Ok(())
    }
}
