use super::{load_model, Report};
use crate::config::CliConfig;
use anyhow::{Context, Result};
use seaquel_builder::{Challenge, ChallengeProgress, SqlGenerator};
use std::fmt::Write as _;
use std::path::Path;

/// Evaluate a challenge against a saved model; fails while any criterion is unmet.
pub fn execute(config: &CliConfig, challenge: &Path, model: &Path) -> Result<Report> {
    let challenge = Challenge::load(challenge)
        .with_context(|| format!("Failed to load challenge {}", challenge.display()))?;
    let model = load_model(model)?;
    let sql = SqlGenerator::new(config.engine.generator.clone()).generate(&model);

    let progress = challenge.evaluate(&model, &sql);
    let output = format_progress(&challenge, &progress);
    Ok(if progress.is_complete() {
        Report::ok(output)
    } else {
        Report::failed(output)
    })
}

fn format_progress(challenge: &Challenge, progress: &ChallengeProgress) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} ({}/{})",
        challenge.title,
        progress.satisfied_count(),
        progress.total()
    );
    for outcome in &progress.outcomes {
        let mark = if outcome.satisfied { "[x]" } else { "[ ]" };
        let _ = writeln!(out, "  {} {}", mark, outcome.criterion);
    }
    // Hints are revealed one per unmet criterion, in order.
    let unmet = progress.total() - progress.satisfied_count();
    for hint in challenge.hints.iter().take(unmet) {
        let _ = writeln!(out, "  hint: {}", hint);
    }
    out.trim_end().to_string()
}
