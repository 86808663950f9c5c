//! Error types for the query builder core.
//!
//! Generation is infallible and canvas mutators never fail, so errors only
//! exist at the edges: reading SQL text, loading persisted models and loading
//! configuration.

use std::path::PathBuf;
use thiserror::Error;

/// Why SQL text could not be turned into a query model.
///
/// None of these are surfaced as failures to the user: the session keeps the
/// text as an override and the last valid model stays in place.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// The grammar rejected the text (typically mid-edit).
    #[error("Syntax error: {0}")]
    Syntax(String),

    /// The text parsed but uses a construct the canvas cannot represent.
    #[error("Unsupported construct: {construct}")]
    Unsupported { construct: String },

    #[error("Expected a single statement, found {count}")]
    MultipleStatements { count: usize },

    #[error("Only SELECT queries can be edited on the canvas")]
    NotAQuery,
}

impl ParseError {
    pub(crate) fn unsupported(construct: impl Into<String>) -> Self {
        ParseError::Unsupported {
            construct: construct.into(),
        }
    }

    /// True for grammar failures, as opposed to valid-but-unrepresentable SQL.
    pub fn is_syntax(&self) -> bool {
        matches!(self, ParseError::Syntax(_))
    }
}

impl From<sqlparser::parser::ParserError> for ParseError {
    fn from(err: sqlparser::parser::ParserError) -> Self {
        ParseError::Syntax(err.to_string())
    }
}

/// Failure to load or store a persisted model.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported model format version {found} (newest known is {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
}

/// Failure to load engine configuration or lesson files.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for parsing SQL text
pub type ParseResult<T> = Result<T, ParseError>;

/// Result type for persistence
pub type PersistResult<T> = Result<T, PersistError>;

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;
