use super::{load_model, Report};
use anyhow::Result;
use seaquel_builder::{diagnose, Severity};
use std::path::Path;

/// Print model diagnostics; fails when any is an error.
pub fn execute(model: &Path) -> Result<Report> {
    let model = load_model(model)?;
    let diagnostics = diagnose(&model);
    if diagnostics.is_empty() {
        return Ok(Report::ok("no problems found"));
    }

    let output = diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n");
    let has_errors = diagnostics.iter().any(|d| d.severity == Severity::Error);
    Ok(if has_errors {
        Report::failed(output)
    } else {
        Report::ok(output)
    })
}
