use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ksimport::cli::headless::{self, RunOptions};
use ksimport::cli::tui;
use ksimport::logging::{self, LogConfig, LogOutput};
use ksimport::{config, context};
use serde::Serialize;
use tokio::io::BufReader;
use tracing::info;

#[derive(Parser)]
#[command(name = "ksimport")]
#[command(about = "Batch keystore importer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ./ksimport.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: ConfigArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive file browser and import screen
    Tui(TuiArgs),
    /// Import the given keystores without a UI
    Run(RunArgs),
    /// Print the effective configuration
    Config,
}

#[derive(Args)]
struct TuiArgs {
    /// Write logs here instead of discarding them
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Args)]
struct RunArgs {
    /// Keystore files to import
    files: Vec<PathBuf>,

    /// Import every keystore in this directory instead
    #[arg(long, conflicts_with = "files")]
    dir: Option<PathBuf>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Serialize)]
struct ConfigArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    keystore_directory: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    start_directory: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    max_password_attempts: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    verbose: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    log_json: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    simulation: Option<bool>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::AppConfig::new(cli.config.as_deref(), Some(&cli.overrides))?;

    let output = match &cli.command {
        // The terminal belongs to the UI.
        Commands::Tui(args) => args
            .log_file
            .clone()
            .map(LogOutput::File)
            .unwrap_or(LogOutput::Sink),
        _ => LogOutput::Stderr,
    };
    logging::init(LogConfig {
        json: config.log_json,
        verbose: config.verbose,
        output,
    })?;
    info!(simulation = config.simulation, "Configuration loaded");

    match cli.command {
        Commands::Tui(_) => {
            let ctx = context::AppContext::new(config);
            tui::run(&ctx).await.context("TUI exited with an error")?
        }
        Commands::Run(args) => {
            let ctx = context::AppContext::new(config);
            run_headless(ctx, args).await?
        }
        Commands::Config => print!("{}", config.to_toml()?),
    }

    Ok(())
}

async fn run_headless(ctx: context::AppContext, args: RunArgs) -> Result<()> {
    let options = RunOptions {
        files: args.files,
        directory: args.dir,
        json: args.json,
    };
    let input = BufReader::new(tokio::io::stdin());
    let mut out = std::io::stdout();

    let outcome = headless::run(&ctx.controller(), &options, input, &mut out).await?;
    headless::check_outcome(outcome)?;
    Ok(())
}
