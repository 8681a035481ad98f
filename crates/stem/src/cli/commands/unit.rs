//! Unit command

use std::time::Duration;

use clap::Args;
use console::style;
use stem_core::ExecutionMode;
use stem_remote::Unit;
use tokio::net::TcpListener;
use tracing::info;

use crate::cli::output;
use crate::cli::{build_runner, resolve_workspace, Cli};

/// Serve a workspace over TCP
#[derive(Debug, Args)]
pub struct UnitCommand {
    /// Address to bind (defaults to unit.host)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind (defaults to unit.port)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Capacity reported to distributors (defaults to unit.powerfullity)
    #[arg(long)]
    pub powerfullity: Option<u64>,

    /// Execution strategy for requested tasks (defaults to runner.mode)
    #[arg(long)]
    pub mode: Option<ExecutionMode>,
}

impl UnitCommand {
    /// Execute the unit command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.execute_async(cli))
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<()> {
        let config = cli.config()?;
        let name = cli
            .workspace
            .clone()
            .unwrap_or_else(|| config.unit.workspace.clone());
        let workspace = resolve_workspace(&name)?;

        let host = self.host.as_deref().unwrap_or(&config.unit.host);
        let port = self.port.unwrap_or(config.unit.port);
        let powerfullity = self.powerfullity.unwrap_or(config.unit.powerfullity);
        let runner = build_runner(&config.runner, self.mode);
        info!(workspace = %name, host, port, powerfullity, mode = %runner.mode(), "executing unit command");

        let listener = TcpListener::bind((host, port)).await?;
        let addr = listener.local_addr()?;

        if !cli.quiet {
            output::info(&format!(
                "Unit serving {} on {} (powerfullity {}, {} runner)",
                style(workspace.name()).bold(),
                style(addr).cyan(),
                powerfullity,
                runner.mode()
            ));
        }

        let unit = Unit::new(workspace)
            .with_powerfullity(powerfullity)
            .with_runner(runner)
            .with_io_timeout(Duration::from_secs(config.network.io_timeout_secs));

        tokio::select! {
            served = unit.serve(listener) => {
                served?;
                if !cli.quiet {
                    output::success("Unit stopped");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
            }
        }
        Ok(())
    }
}
