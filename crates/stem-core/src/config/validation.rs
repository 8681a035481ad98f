//! Configuration validation

use std::net::SocketAddr;

use tracing::debug;

use crate::error::{ConfigError, Result};

use super::types::Config;

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    validate_runner(config)?;
    validate_unit(config)?;
    validate_distributor(config)?;
    validate_network(config)?;
    debug!("configuration validation passed");
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
}

fn validate_runner(config: &Config) -> Result<()> {
    if config.runner.threads == 0 {
        return Err(invalid("runner.threads", "must be at least 1").into());
    }

    if let Some(program) = &config.runner.worker_program {
        if program.as_os_str().is_empty() {
            return Err(invalid("runner.worker_program", "cannot be empty").into());
        }
    }

    Ok(())
}

fn validate_unit(config: &Config) -> Result<()> {
    validate_bind(&config.unit.host, config.unit.port, "unit")?;

    if config.unit.workspace.is_empty() {
        return Err(invalid("unit.workspace", "cannot be empty").into());
    }

    Ok(())
}

fn validate_distributor(config: &Config) -> Result<()> {
    validate_bind(&config.distributor.host, config.distributor.port, "distributor")?;

    if config.distributor.units.is_empty() {
        return Err(invalid("distributor.units", "at least one unit is required").into());
    }

    for (i, unit) in config.distributor.units.iter().enumerate() {
        if !is_host_port(unit) {
            return Err(invalid(
                &format!("distributor.units[{}]", i),
                format!("'{}' is not a host:port address", unit),
            )
            .into());
        }
    }

    Ok(())
}

fn validate_network(config: &Config) -> Result<()> {
    if config.network.io_timeout_secs == 0 {
        return Err(invalid("network.io_timeout_secs", "must be at least 1").into());
    }
    Ok(())
}

fn validate_bind(host: &str, port: u16, section: &str) -> Result<()> {
    if host.trim().is_empty() {
        return Err(invalid(&format!("{}.host", section), "cannot be empty").into());
    }
    if !is_host_port(&format!("{}:{}", host, port)) {
        return Err(invalid(&format!("{}.host", section), format!("'{}' is not a valid host", host)).into());
    }
    Ok(())
}

/// `host:port` with a non-empty host and a numeric port; IPv6 must be bracketed
pub fn is_host_port(addr: &str) -> bool {
    if addr.parse::<SocketAddr>().is_ok() {
        return true;
    }
    match addr.rsplit_once(':') {
        Some((host, port)) => {
            !host.is_empty()
                && !host.contains(':')
                && !host.chars().any(char::is_whitespace)
                && port.parse::<u16>().is_ok()
        }
        None => false,
    }
}
