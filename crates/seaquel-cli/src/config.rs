//! Effective configuration: engine config file, then CLI overrides.

use anyhow::{Context, Result};
use seaquel_builder::{EngineConfig, GeneratorConfig, SchemaCatalog, SqlDialect};
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub engine: EngineConfig,
    pub catalog: SchemaCatalog,
}

impl CliConfig {
    pub fn load(
        config_file: Option<PathBuf>,
        dialect: Option<SqlDialect>,
        compact: bool,
        catalog_file: Option<PathBuf>,
    ) -> Result<Self> {
        let mut engine = EngineConfig::load_or_default(config_file.as_deref())
            .context("Failed to load engine config")?;

        if let Some(dialect) = dialect {
            engine.parser.dialect = dialect;
        }
        if compact {
            engine.generator = GeneratorConfig {
                indent: engine.generator.indent,
                ..GeneratorConfig::compact()
            };
        }

        let catalog = match catalog_file {
            Some(path) => SchemaCatalog::load(&path)
                .with_context(|| format!("Failed to load schema catalog {}", path.display()))?,
            None => SchemaCatalog::default(),
        };

        debug!(
            dialect = engine.parser.dialect.name(),
            pretty = engine.generator.pretty,
            tables = catalog.table_names().count(),
            "effective configuration"
        );
        Ok(Self { engine, catalog })
    }
}
