//! Stem - run task dependency trees locally or across units

mod cli;
mod exit_codes;
mod registry;

use clap::Parser;
use stem_core::StemError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use cli::{output, Cli};

fn main() {
    let guard = init_tracing();

    let cli = Cli::parse();
    if let Err(e) = cli.execute() {
        tracing::debug!(error = ?e, "command failed");
        output::error(&format!("{:#}", e));
        drop(guard);
        std::process::exit(exit_code(&e));
    }
}

fn exit_code(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<StemError>() {
        Some(StemError::Config(_)) => exit_codes::CONFIG_ERROR,
        _ => exit_codes::ERROR,
    }
}

/// Set up tracing with two layers:
/// - Console: controlled by RUST_LOG (default: warn), written to stderr
/// - File: always debug-level JSON to ~/.stem/logs/
///
/// Console output goes to stderr so `stem worker` keeps stdout for envelopes.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    if let Some(log_dir) = log_directory() {
        let file_appender = tracing_appender::rolling::daily(&log_dir, "stem.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_filter(console_filter),
            )
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .with_target(true)
                    .with_filter(EnvFilter::new("debug")),
            )
            .init();

        return Some(guard);
    }

    // Fallback: console only
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(console_filter),
        )
        .init();

    None
}

/// Returns the log directory path, creating it if needed.
fn log_directory() -> Option<std::path::PathBuf> {
    let log_dir = dirs::home_dir()?.join(".stem").join("logs");
    std::fs::create_dir_all(&log_dir).ok()?;
    Some(log_dir)
}
