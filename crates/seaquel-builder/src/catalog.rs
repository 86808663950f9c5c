//! Known tables and their declared columns.
//!
//! Supplied by the host from whatever connection is open. The engine only
//! uses it to order columns canonically and, through those columns, to find
//! the owner of an unqualified column name. An empty catalog is always valid.

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaCatalog {
    tables: BTreeMap<String, Vec<String>>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with_table<I, S>(mut self, name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(name, columns);
        self
    }

    pub fn insert<I, S>(&mut self, name: impl Into<String>, columns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables
            .insert(name.into(), columns.into_iter().map(Into::into).collect());
    }

    /// Declared columns of a table (ASCII case-insensitive lookup).
    pub fn columns(&self, table: &str) -> Option<&[String]> {
        self.tables
            .get(table)
            .or_else(|| {
                self.tables
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(table))
                    .map(|(_, columns)| columns)
            })
            .map(Vec::as_slice)
    }

    /// Declared columns, or an empty list for unknown tables.
    pub fn columns_or_empty(&self, table: &str) -> Vec<String> {
        self.columns(table).map(<[String]>::to_vec).unwrap_or_default()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Parse a `{"table": ["column", ...]}` document.
    pub fn from_json_str(input: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_json_str(&content)?;
        debug!(path = %path.display(), tables = catalog.tables.len(), "loaded schema catalog");
        Ok(catalog)
    }
}
