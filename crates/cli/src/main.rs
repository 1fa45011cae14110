//! Skein CLI — the main entry point.
//!
//! Commands:
//! - `demo`    — Run the invoker decoding pipeline
//! - `report`  — Print the build report of the invoker assembly
//! - `config`  — Show, locate, or validate the configuration
//! - `doctor`  — Diagnose configuration and assembly health

use clap::{Parser, Subcommand};

mod commands;
mod decoding;

#[derive(Parser)]
#[command(
    name = "skein",
    about = "Skein — assemble processors into resolved pipelines and run them",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the invoker decoding pipeline
    Demo {
        /// Fill mode for the run (none, classes, values, all)
        #[arg(short, long)]
        fill: Option<String>,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the build report of the invoker assembly
    Report {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Diagnose configuration and assembly health
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the configuration file path
    Path,
    /// Validate the configuration file
    Validate,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Demo { fill, json } => commands::demo::run(fill.as_deref(), json)?,
        Commands::Report { json } => commands::report::run(json)?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show()?,
            ConfigAction::Path => commands::config_cmd::path()?,
            ConfigAction::Validate => commands::config_cmd::validate()?,
        },
        Commands::Doctor => commands::doctor::run()?,
    }

    Ok(())
}
