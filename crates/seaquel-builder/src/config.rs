//! Engine configuration.
//!
//! Every field has a default, so an empty or partial TOML file is valid:
//!
//! ```toml
//! [generator]
//! pretty = false
//! indent = 4
//!
//! [parser]
//! dialect = "postgresql"
//! ```

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use sqlparser::dialect::{
    Dialect, DuckDbDialect, GenericDialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect,
    SQLiteDialect,
};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

/// Widest indent accepted from configuration.
pub const MAX_INDENT: usize = 16;

/// Top-level configuration for generator and reconciler.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub generator: GeneratorConfig,
    pub parser: ParserConfig,
}

/// SQL text layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// One clause per line with indented nested bodies; single line otherwise.
    pub pretty: bool,
    /// Spaces per nesting level in pretty mode, at most [`MAX_INDENT`].
    pub indent: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            pretty: true,
            indent: 2,
        }
    }
}

impl GeneratorConfig {
    /// Single-line layout.
    pub fn compact() -> Self {
        Self {
            pretty: false,
            ..Self::default()
        }
    }

    /// The same layout with `indent` limited to [`MAX_INDENT`].
    pub fn clamped(self) -> Self {
        if self.indent > MAX_INDENT {
            warn!(indent = self.indent, max = MAX_INDENT, "clamping generator indent");
        }
        Self {
            indent: self.indent.min(MAX_INDENT),
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    pub dialect: SqlDialect,
}

/// Grammar used when reading SQL text back into the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    #[default]
    Generic,
    PostgreSql,
    MySql,
    Sqlite,
    DuckDb,
    MsSql,
}

impl SqlDialect {
    pub fn parser_dialect(self) -> Box<dyn Dialect> {
        match self {
            SqlDialect::Generic => Box::new(GenericDialect {}),
            SqlDialect::PostgreSql => Box::new(PostgreSqlDialect {}),
            SqlDialect::MySql => Box::new(MySqlDialect {}),
            SqlDialect::Sqlite => Box::new(SQLiteDialect {}),
            SqlDialect::DuckDb => Box::new(DuckDbDialect {}),
            SqlDialect::MsSql => Box::new(MsSqlDialect {}),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SqlDialect::Generic => "generic",
            SqlDialect::PostgreSql => "postgresql",
            SqlDialect::MySql => "mysql",
            SqlDialect::Sqlite => "sqlite",
            SqlDialect::DuckDb => "duckdb",
            SqlDialect::MsSql => "mssql",
        }
    }
}

impl FromStr for SqlDialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "generic" | "ansi" => Ok(SqlDialect::Generic),
            "postgresql" | "postgres" | "pg" => Ok(SqlDialect::PostgreSql),
            "mysql" | "mariadb" => Ok(SqlDialect::MySql),
            "sqlite" => Ok(SqlDialect::Sqlite),
            "duckdb" => Ok(SqlDialect::DuckDb),
            "mssql" | "sqlserver" => Ok(SqlDialect::MsSql),
            other => Err(format!("unknown SQL dialect '{}'", other)),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(input: &str) -> ConfigResult<Self> {
        let mut config: Self = toml::from_str(input)?;
        config.generator = config.generator.clamped();
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        debug!(path = %path.display(), dialect = config.parser.dialect.name(), "loaded engine config");
        Ok(config)
    }

    /// Load from a file when one is given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> ConfigResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
