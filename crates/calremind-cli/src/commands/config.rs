//! Configuration commands.

use std::path::Path;

use crate::config::DaemonConfig;
use crate::error::{CliError, CliResult};
use crate::secret;

/// Dump the current configuration to stdout.
pub fn dump(config: &DaemonConfig, path: &Path) -> CliResult<()> {
    let toml_str = toml::to_string_pretty(config)
        .map_err(|e| CliError::config(format!("failed to serialize config: {e}")))?;
    println!("# config.toml ({})", path.display());
    println!("{toml_str}");
    Ok(())
}

/// Validate the configuration, including secret references.
pub fn validate(config: &DaemonConfig) -> CliResult<()> {
    config.validate()?;

    if let Some(uri) = &config.queue.uri {
        secret::resolve(uri)?;
        println!("Broker URI resolves.");
    }
    if let Some(smtp) = &config.sender.smtp {
        secret::resolve_opt(smtp.password.as_deref())?;
        println!("SMTP password resolves.");
    }
    config.sender.templates()?;

    println!("Configuration is valid.");
    Ok(())
}

/// Show the configuration file path.
pub fn path(path: &Path) -> CliResult<()> {
    println!("config: {}", path.display());
    println!("data:   {}", DaemonConfig::default_data_dir().display());
    Ok(())
}
