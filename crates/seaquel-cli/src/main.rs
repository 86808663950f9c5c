use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use seaquel_cli::{
    cli::{Cli, Commands},
    commands,
    config::CliConfig,
};

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Logs go to stderr so command output stays pipeable.
    let level: LevelFilter = cli.log_level.into();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = CliConfig::load(cli.config, cli.dialect, cli.compact, cli.catalog)?;

    let report = match cli.command {
        Commands::Generate { model } => commands::generate::execute(&config, &model)?,
        Commands::Parse { file } => commands::parse::execute(&config, &file)?,
        Commands::Check { challenge, model } => {
            commands::check::execute(&config, &challenge, &model)?
        }
        Commands::Placeholders { file } => commands::parse::placeholders(&file)?,
        Commands::Diagnose { model } => commands::diagnose::execute(&model)?,
        Commands::Config => commands::config::show(&config)?,
    };

    if !report.output.is_empty() {
        println!("{}", report.output);
    }
    Ok(if report.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
