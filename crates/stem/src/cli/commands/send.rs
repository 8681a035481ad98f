//! Send command

use std::time::Duration;

use anyhow::Context;
use clap::Args;
use serde_json::{json, Value};
use stem_core::{Envelope, Meta};
use stem_remote::Client;
use tracing::info;

use super::run::parse_meta;
use crate::cli::output::{self, header};
use crate::cli::{Cli, OutputFormat};
use crate::exit_codes;

/// Send one request to a unit or distributor
#[derive(Debug, Args)]
pub struct SendCommand {
    /// Address of the unit or distributor
    #[arg(value_name = "HOST:PORT")]
    pub addr: String,

    /// Command to send (run, structure, powerfullity, stop)
    pub command: String,

    /// Task path for `run`
    #[arg(short, long)]
    pub task_path: Option<String>,

    /// Task meta for `run`, as a JSON object or @FILE
    #[arg(short, long, value_name = "JSON")]
    pub meta: Option<String>,

    /// Payload file sent as the envelope data
    #[arg(short, long, value_name = "FILE")]
    pub data: Option<std::path::PathBuf>,
}

impl SendCommand {
    /// Execute the send command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(addr = %self.addr, command = %self.command, "executing send command");
        let config = cli.config()?;

        let request = self.request()?;
        let client = Client::new(self.addr.as_str())
            .with_timeout(Duration::from_secs(config.network.io_timeout_secs));
        let response = client
            .send_blocking(&request)
            .with_context(|| format!("request to {} failed", self.addr))?;

        match cli.format {
            OutputFormat::Json => output::json(&json!({
                "meta": response.meta.clone().into_value(),
                "data_len": response.data.len(),
            }))?,
            OutputFormat::Text => print_response(cli, &response),
        }

        if !response.is_success() {
            std::process::exit(exit_codes::REMOTE_ERROR);
        }
        Ok(())
    }

    fn request(&self) -> anyhow::Result<Envelope> {
        let mut meta = Meta::new().with("command", self.command.as_str());
        if let Some(task_path) = &self.task_path {
            meta.update("task_path", task_path.as_str());
        }
        if self.meta.is_some() {
            meta.update("task_meta", parse_meta(self.meta.as_deref())?.into_value());
        }

        let data = match &self.data {
            Some(path) => std::fs::read(path)
                .with_context(|| format!("failed to read payload {}", path.display()))?,
            None => Vec::new(),
        };
        Ok(Envelope::with_data(meta, data)?)
    }
}

fn print_response(cli: &Cli, response: &Envelope) {
    if let Some(error) = response.error() {
        output::error(error);
        if let Some(errors) = response.meta.get("meta_errors") {
            eprintln!("{}", output::value(errors));
        }
        return;
    }

    if cli.quiet {
        let body: Value = response
            .meta
            .iter()
            .filter(|(key, _)| key.as_str() != "status")
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect::<serde_json::Map<_, _>>()
            .into();
        println!("{}", output::value(&body));
        return;
    }

    println!("{}", header("Response"));
    for (key, value) in response.meta.iter() {
        println!("{}", output::key_value(key, &output::value(value)));
    }
    if !response.data.is_empty() {
        println!("{}", output::key_value("data", &format!("{} bytes", response.data.len())));
    }
}
