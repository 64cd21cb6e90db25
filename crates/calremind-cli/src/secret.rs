//! Secret references in `config.toml`.
//!
//! The SMTP password and the broker URI may point outside the file:
//!
//! - `pass::path/in/store`: first line of `pass show path/in/store`
//! - `env::VAR_NAME`: value of `$VAR_NAME`
//! - anything else is used as written

use std::process::Command;

use crate::error::{CliError, CliResult};

/// Expands a value that may be a secret reference.
pub fn resolve(value: &str) -> CliResult<String> {
    if let Some(entry) = value.strip_prefix("pass::") {
        from_pass(entry)
    } else if let Some(var) = value.strip_prefix("env::") {
        std::env::var(var)
            .map_err(|_| CliError::Secret(format!("environment variable `{var}` is not set")))
    } else {
        Ok(value.to_string())
    }
}

/// Resolves an optional value, keeping `None` as is.
pub fn resolve_opt(value: Option<&str>) -> CliResult<Option<String>> {
    value.map(resolve).transpose()
}

fn from_pass(entry: &str) -> CliResult<String> {
    let output = Command::new("pass")
        .arg("show")
        .arg(entry)
        .output()
        .map_err(|e| CliError::Secret(format!("failed to run `pass show {entry}`: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CliError::Secret(format!(
            "`pass show {entry}` failed ({}): {}",
            output.status,
            stderr.trim()
        )));
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(str::to_string)
        .ok_or_else(|| CliError::Secret(format!("`pass show {entry}` printed nothing")))
}
