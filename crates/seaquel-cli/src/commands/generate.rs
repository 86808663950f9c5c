use super::{load_model, Report};
use crate::config::CliConfig;
use anyhow::Result;
use seaquel_builder::SqlGenerator;
use std::path::Path;
use tracing::debug;

/// Render a persisted model as SQL.
pub fn execute(config: &CliConfig, model: &Path) -> Result<Report> {
    let model = load_model(model)?;
    let rendered = SqlGenerator::new(config.engine.generator.clone()).render(&model);
    debug!(placeholders = ?rendered.placeholders, "rendered model");
    Ok(Report::ok(rendered.sql))
}
