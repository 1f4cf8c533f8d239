mod commands;
mod logging;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use panel_library_config::{ConfigLoader, LogFormat};
use tracing::error;

#[derive(Parser)]
#[command(name = "panel-library", version, about = "Library element schema tooling")]
struct Cli {
    /// Config file (YAML or TOML).
    #[arg(long, global = true, env = "PANEL_LIBRARY_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database path, overrides the config file.
    #[arg(long, global = true, env = "PANEL_LIBRARY_DATABASE")]
    database: Option<PathBuf>,

    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormatArg>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending schema migrations.
    Migrate,
    /// Show applied and pending migrations.
    Status {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Text,
    Json,
}

fn main() {
    if let Err(e) = run() {
        error!("{e:#}");
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ConfigLoader::load(cli.config.as_deref()).context("failed to load config")?;
    if let Some(database) = cli.database {
        config.database.path = Some(database);
    }
    if let Some(format) = cli.log_format {
        config.log.format = match format {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        };
    }
    logging::init(&config.log);

    match cli.command {
        Command::Migrate => {
            let report = commands::migrate(&config).context("migration failed")?;
            println!(
                "{} migration(s) applied, {} already applied",
                report.applied.len(),
                report.skipped.len()
            );
            for id in &report.applied {
                println!("  applied: {id}");
            }
        }
        Command::Status { json } => {
            let steps = commands::status(&config).context("failed to read migration status")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&steps)?);
            } else if steps.is_empty() {
                println!("panel library is disabled; no migrations registered");
            } else {
                for step in &steps {
                    match step.applied_at {
                        Some(at) => println!("[applied {}] {}", at.to_rfc3339(), step.id),
                        None => println!("[pending] {}", step.id),
                    }
                }
            }
        }
    }

    Ok(())
}
