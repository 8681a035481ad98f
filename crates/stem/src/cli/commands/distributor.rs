//! Distributor command

use std::time::Duration;

use anyhow::bail;
use clap::Args;
use console::style;
use stem_core::config::is_host_port;
use stem_remote::Distributor;
use tokio::net::TcpListener;
use tracing::info;

use crate::cli::output::{self, key_value};
use crate::cli::Cli;

/// Forward requests to the strongest of several units
#[derive(Debug, Args)]
pub struct DistributorCommand {
    /// Address to bind (defaults to distributor.host)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind (defaults to distributor.port)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Unit address; repeat for several units (defaults to distributor.units)
    #[arg(short, long = "unit", value_name = "HOST:PORT")]
    pub units: Vec<String>,
}

impl DistributorCommand {
    /// Execute the distributor command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.execute_async(cli))
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<()> {
        let config = cli.config()?;
        let units = if self.units.is_empty() {
            config.distributor.units.clone()
        } else {
            self.units.clone()
        };
        if let Some(bad) = units.iter().find(|unit| !is_host_port(unit)) {
            bail!("invalid unit address '{}' (expected host:port)", bad);
        }

        let host = self.host.as_deref().unwrap_or(&config.distributor.host);
        let port = self.port.unwrap_or(config.distributor.port);
        info!(host, port, units = ?units, "executing distributor command");

        let listener = TcpListener::bind((host, port)).await?;
        let addr = listener.local_addr()?;

        if !cli.quiet {
            output::info(&format!("Distributor listening on {}", style(addr).cyan()));
            for (i, unit) in units.iter().enumerate() {
                println!("{}", key_value(&format!("unit {}", i + 1), unit));
            }
        }

        let distributor = Distributor::new(units)
            .with_io_timeout(Duration::from_secs(config.network.io_timeout_secs));

        tokio::select! {
            served = distributor.serve(listener) => served?,
            _ = tokio::signal::ctrl_c() => info!("interrupted"),
        }
        Ok(())
    }
}
