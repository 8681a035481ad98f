//! Configuration types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::runner::{ExecutionMode, DEFAULT_THREADS};

/// Main configuration for Stem
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Version of the config schema
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Local execution settings
    pub runner: RunnerConfig,

    /// Unit server settings
    pub unit: UnitConfig,

    /// Distributor server settings
    pub distributor: DistributorConfig,

    /// Socket settings shared by servers and clients
    pub network: NetworkConfig,
}

/// Local execution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Strategy used by `stem run` and by units
    pub mode: ExecutionMode,

    /// Worker threads per node in threaded mode
    pub threads: usize,

    /// Worker program for process mode, invoked as `<program> worker`;
    /// defaults to this executable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_program: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Sequential,
            threads: DEFAULT_THREADS,
            worker_program: None,
        }
    }
}

/// Unit server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitConfig {
    pub host: String,
    pub port: u16,

    /// Capacity reported to distributors
    pub powerfullity: u64,

    /// Name of the registered workspace to serve
    pub workspace: String,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 5000,
            powerfullity: 1,
            workspace: "demo".to_string(),
        }
    }
}

/// Distributor server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributorConfig {
    pub host: String,
    pub port: u16,

    /// Known units as `host:port`
    pub units: Vec<String>,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 5100,
            units: vec!["127.0.0.1:5000".to_string()],
        }
    }
}

/// Socket settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Deadline for each connect, read and write
    pub io_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            io_timeout_secs: 30,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
