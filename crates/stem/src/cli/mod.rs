//! CLI definition and command handling

pub mod commands;
pub mod output;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use stem_core::config::{load_config_or_default, validate_config, Config, RunnerConfig};
use stem_core::{
    ExecutionMode, ProcessRunner, ResolveError, Runner, ThreadedRunner, WorkerCommand, Workspace,
};
use tracing::debug;

use crate::registry;
use commands::{
    CompletionsCommand, DistributorCommand, RunCommand, SendCommand, StructureCommand,
    UnitCommand, WorkerCommand as WorkerSubcommand,
};

/// Stem - run task dependency trees locally or across units
#[derive(Debug, Parser)]
#[command(name = "stem")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Working directory
    #[arg(short = 'C', long, global = true)]
    pub directory: Option<std::path::PathBuf>,

    /// Registered workspace to operate on [default: demo]
    #[arg(short, long, global = true)]
    pub workspace: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the tasks of a workspace or the dependency tree of one task
    Structure(StructureCommand),

    /// Execute a task and print its result
    Run(RunCommand),

    /// Serve a workspace over TCP
    Unit(UnitCommand),

    /// Forward requests to the strongest of several units
    Distributor(DistributorCommand),

    /// Send one request to a unit or distributor
    Send(SendCommand),

    /// Answer one process-runner request on stdin/stdout
    #[command(hide = true)]
    Worker(WorkerSubcommand),

    /// Generate shell completions
    Completions(CompletionsCommand),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> anyhow::Result<()> {
        // Change to specified directory if provided
        if let Some(dir) = &self.directory {
            std::env::set_current_dir(dir)?;
        }

        match self.command {
            Commands::Structure(ref cmd) => cmd.execute(&self),
            Commands::Run(ref cmd) => cmd.execute(&self),
            Commands::Unit(ref cmd) => cmd.execute(&self),
            Commands::Distributor(ref cmd) => cmd.execute(&self),
            Commands::Send(ref cmd) => cmd.execute(&self),
            Commands::Worker(ref cmd) => cmd.execute(&self),
            Commands::Completions(ref cmd) => cmd.execute(&self),
        }
    }

    /// Whether human-readable progress should be printed
    pub fn chatty(&self) -> bool {
        !self.quiet && self.format == OutputFormat::Text
    }

    /// Configuration found from the working directory, validated
    pub fn config(&self) -> anyhow::Result<Config> {
        let cwd = std::env::current_dir()?;
        let (config, path) = load_config_or_default(&cwd);
        if let Some(path) = &path {
            debug!(path = %path.display(), "loaded configuration");
        }
        validate_config(&config)?;
        Ok(config)
    }

    /// Name of the workspace selected with `--workspace`
    pub fn workspace_name(&self) -> &str {
        self.workspace.as_deref().unwrap_or(registry::DEFAULT_WORKSPACE)
    }

    /// The registered workspace selected with `--workspace`
    pub fn selected_workspace(&self) -> anyhow::Result<Arc<Workspace>> {
        resolve_workspace(self.workspace_name())
    }
}

/// Look up a registered workspace by name
pub fn resolve_workspace(name: &str) -> anyhow::Result<Arc<Workspace>> {
    registry::lookup(name).ok_or_else(|| ResolveError::WorkspaceNotFound(name.to_string()).into())
}

/// Build the runner for `mode`, falling back to the configured one
pub fn build_runner(config: &RunnerConfig, mode: Option<ExecutionMode>) -> Runner {
    match mode.unwrap_or(config.mode) {
        ExecutionMode::Threaded => Runner::Threaded(ThreadedRunner::new(config.threads)),
        ExecutionMode::Process => {
            let command = config
                .worker_program
                .as_ref()
                .map(|program| WorkerCommand::new(program).arg("worker"))
                .unwrap_or_default();
            Runner::Process(ProcessRunner::new(command))
        }
        mode => Runner::from_mode(mode),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["stem", "-w", "text", "--format", "json", "structure"]);
        assert_eq!(cli.workspace_name(), "text");
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(!cli.chatty());
        assert_eq!(cli.selected_workspace().unwrap().name(), "text");

        let cli = Cli::parse_from(["stem", "structure"]);
        assert_eq!(cli.workspace_name(), "demo");
        assert!(cli.chatty());
    }

    #[test]
    fn test_unknown_workspace() {
        let cli = Cli::parse_from(["stem", "-w", "nowhere", "structure"]);
        let err = cli.selected_workspace().unwrap_err();
        assert_eq!(err.to_string(), "workspace not found: nowhere");
    }

    #[test]
    fn test_build_runner() {
        let config = RunnerConfig {
            mode: ExecutionMode::Threaded,
            threads: 3,
            worker_program: Some("/opt/stem".into()),
        };

        match build_runner(&config, None) {
            Runner::Threaded(runner) => assert_eq!(runner.threads(), 3),
            other => panic!("unexpected runner {:?}", other),
        }
        match build_runner(&config, Some(ExecutionMode::Process)) {
            Runner::Process(runner) => {
                assert_eq!(runner.command(), &WorkerCommand::new("/opt/stem").arg("worker"));
            }
            other => panic!("unexpected runner {:?}", other),
        }
        assert_eq!(
            build_runner(&config, Some(ExecutionMode::Cooperative)).mode(),
            ExecutionMode::Cooperative
        );
    }
}
