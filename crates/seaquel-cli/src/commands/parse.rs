use super::{read_file, Report};
use crate::config::CliConfig;
use anyhow::{Context, Result};
use seaquel_builder::persist::to_json;
use seaquel_builder::{placeholder_names, Reconciler};
use std::path::Path;
use tracing::info;

/// Read SQL into a model. Text the canvas cannot represent is reported with
/// its reason and a failed status.
pub fn execute(config: &CliConfig, file: &Path) -> Result<Report> {
    let sql = read_file(file)?;
    let reconciler = Reconciler::new(config.engine.parser.dialect, &config.catalog);
    match reconciler.parse_model(&sql) {
        Ok(model) => {
            let json = to_json(&model).context("Failed to serialize model")?;
            Ok(Report::ok(json))
        }
        Err(reason) => {
            info!(file = %file.display(), %reason, "SQL kept as text");
            Ok(Report::failed(reason.to_string()))
        }
    }
}

/// List `{{name}}` placeholders, one per line, in order of first appearance.
pub fn placeholders(file: &Path) -> Result<Report> {
    let sql = read_file(file)?;
    Ok(Report::ok(placeholder_names(&sql).join("\n")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use seaquel_builder::persist::from_json;
    use seaquel_builder::SchemaCatalog;

    fn write(dir: &tempfile::TempDir, sql: &str) -> std::path::PathBuf {
        let path = dir.path().join("query.sql");
        std::fs::write(&path, sql).unwrap();
        path
    }

    #[test]
    fn test_parse_prints_persisted_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "SELECT id FROM orders WHERE total > {{min_total}}");
        let config = CliConfig {
            catalog: SchemaCatalog::new().with_table("orders", ["id", "total"]),
            ..CliConfig::default()
        };

        let report = execute(&config, &path).unwrap();
        assert!(report.success);
        let model = from_json(&report.output).unwrap();
        assert_eq!(model.root.tables[0].name, "orders");
        assert_eq!(model.root.filters[0].column, "orders.total");
    }

    #[test]
    fn test_parse_reports_unsupported_construct() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "SELECT DISTINCT orders.id FROM orders");

        let report = execute(&CliConfig::default(), &path).unwrap();
        assert!(!report.success);
        assert!(report.output.starts_with("Unsupported construct"));
    }

    #[test]
    fn test_placeholders_listed_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "SELECT * FROM t WHERE a = {{x}} AND b = '{{not_me}}' AND c = {{y}} LIMIT {{x}}",
        );
        assert_eq!(placeholders(&path).unwrap().output, "x\ny");
    }
}
