//! Subcommand implementations.
//!
//! Each command returns a [`Report`] instead of printing, so `main` owns
//! stdout and the exit code.

pub mod check;
pub mod config;
pub mod diagnose;
pub mod generate;
pub mod parse;

use anyhow::{Context, Result};
use seaquel_builder::persist::from_json;
use seaquel_builder::QueryModel;
use std::path::Path;

/// Command output plus whether the command achieved what was asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub output: String,
    pub success: bool,
}

impl Report {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: true,
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: false,
        }
    }
}

pub(crate) fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

pub(crate) fn load_model(path: &Path) -> Result<QueryModel> {
    let content = read_file(path)?;
    from_json(&content).with_context(|| format!("Failed to load model {}", path.display()))
}
