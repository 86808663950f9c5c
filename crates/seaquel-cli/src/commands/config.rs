use super::Report;
use crate::config::CliConfig;
use anyhow::{Context, Result};

/// Show the effective engine configuration, with CLI overrides applied.
pub fn show(config: &CliConfig) -> Result<Report> {
    let toml = toml::to_string_pretty(&config.engine).context("Failed to serialize config")?;
    Ok(Report::ok(toml.trim_end()))
}
