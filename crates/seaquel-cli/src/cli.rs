use clap::{Parser, Subcommand, ValueEnum};
use seaquel_builder::SqlDialect;
use std::path::PathBuf;
use tracing_subscriber::filter::LevelFilter;

/// Log level options for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// No logging output
    Off,
    /// Error messages only
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
    /// Trace-level messages (most verbose)
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "seaquel")]
#[command(about = "seaquel - generate, parse and check visual query builder models")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Set log level (off, error, warn, info, debug, trace)
    #[arg(short = 'l', long, global = true, value_enum, default_value = "warn")]
    pub log_level: LogLevel,

    /// Engine config file (TOML with [generator] and [parser] sections)
    #[arg(short = 'C', long, global = true, env = "SEAQUEL_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQL dialect used to read SQL (overrides config file)
    #[arg(short = 'd', long, global = true, env = "SEAQUEL_DIALECT")]
    pub dialect: Option<SqlDialect>,

    /// Single-line SQL output (overrides config file)
    #[arg(long, global = true)]
    pub compact: bool,

    /// Schema catalog JSON mapping table names to column lists
    #[arg(long, global = true)]
    pub catalog: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render a saved model as SQL
    Generate {
        /// Persisted model JSON
        #[arg(value_name = "MODEL")]
        model: PathBuf,
    },

    /// Read SQL into a model and print it as persisted JSON
    Parse {
        #[arg(value_name = "SQL_FILE")]
        file: PathBuf,
    },

    /// Evaluate a lesson challenge against a saved model
    Check {
        /// Challenge file (TOML, or JSON by extension)
        #[arg(value_name = "CHALLENGE")]
        challenge: PathBuf,

        #[arg(value_name = "MODEL")]
        model: PathBuf,
    },

    /// List the template placeholders in a SQL file
    Placeholders {
        #[arg(value_name = "SQL_FILE")]
        file: PathBuf,
    },

    /// Report dangling references and other model problems
    Diagnose {
        #[arg(value_name = "MODEL")]
        model: PathBuf,
    },

    /// Show the effective engine configuration as TOML
    Config,
}
