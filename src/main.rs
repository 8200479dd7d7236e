// Cloud Doctor Patient - Main Entry Point
//
// - `serve`: the board API with the chaos dispatch surface
// - `chaos`: run one scenario in-process and print its diagnostic report

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use patient::auth::TokenSigner;
use patient::chaos::{ChaosHarness, ScenarioKind};
use patient::config::{Config, DEFAULT_CONFIG_FILE};
use patient::logging::LogSettings;
use patient::{metrics, server};

/// Patient: a board API that breaks on request
#[derive(Parser, Debug)]
#[command(name = "patient")]
#[command(author = "Cloud Doctor Contributors")]
#[command(version)]
#[command(about = "Board API with built-in chaos scenarios", long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Keep tables in process instead of connecting to MySQL
        #[arg(long)]
        in_memory: bool,
    },
    /// Run a single chaos scenario and print its report as JSON
    Chaos {
        /// Scenario name (db-fail, pool-exhaustion, memory-leak, slow-query,
        /// api-timeout, jwt-expiry, high-cpu)
        #[arg(value_parser = parse_scenario)]
        scenario: ScenarioKind,

        /// Keep tables in process instead of connecting to MySQL
        #[arg(long)]
        in_memory: bool,
    },
}

fn parse_scenario(name: &str) -> Result<ScenarioKind, String> {
    name.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load_from_path(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;

    let settings = LogSettings::from_config(&config.logging)?.with_verbosity(args.verbose);

    match args.command {
        Commands::Serve { in_memory } => {
            settings.init()?;
            info!("Cloud Doctor patient v{} starting...", env!("CARGO_PKG_VERSION"));
            server::serve(config, in_memory).await
        }
        Commands::Chaos { scenario, in_memory } => {
            settings.with_stderr().init()?;
            run_scenario(config, scenario, in_memory).await
        }
    }
}

/// Run one scenario to completion, background kinds included
async fn run_scenario(config: Config, kind: ScenarioKind, in_memory: bool) -> Result<()> {
    metrics::init().context("Failed to initialize metrics")?;

    let store = server::build_store(&config, in_memory);
    // db-fail targets its own unreachable host and never touches the store
    if kind != ScenarioKind::DbFailure {
        server::prepare_store(store.as_ref(), &config).await?;
    }

    let signer = TokenSigner::new(&config.auth.jwt_secret);
    let harness = ChaosHarness::new(Arc::clone(&store), config.chaos, signer)?;

    info!("Running chaos scenario: {}", kind);
    let report = harness.run(kind).await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
