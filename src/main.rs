//! registry-gateway command line.
//!
//! Loads a gateway configuration, builds one resilient client per registry
//! and runs a single lookup or search, printing the JSON body to stdout.
//! Logs go to stderr. Ctrl-C cancels the call in flight.

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use registry_gateway::config::{load_config, GatewayConfig};
use registry_gateway::observability::{logging, metrics};
use registry_gateway::Gateway;

#[derive(Parser)]
#[command(name = "registry-gateway")]
#[command(about = "Resilient lookups against business-registry APIs", long_about = None)]
struct Cli {
    /// Path to the gateway configuration file
    #[arg(short, long, default_value = "config/gateway.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Lookup(Lookup),
    /// Validate the configuration file and exit
    CheckConfig,
}

/// Commands that go through a live gateway.
#[derive(Subcommand)]
enum Lookup {
    /// Fetch one company by registry identifier
    Company { registry: String, id: String },
    /// Search companies by name
    Search { registry: String, query: String },
    /// List configured registries and their resilience state
    Registries,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}: {}", cli.config.display(), e);
            std::process::exit(2);
        }
    };

    let lookup = match cli.command {
        Commands::Lookup(lookup) => lookup,
        Commands::CheckConfig => {
            println!(
                "{}: ok ({} registries)",
                cli.config.display(),
                config.registries.len()
            );
            return Ok(());
        }
    };

    logging::init(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "registry-gateway starting"
    );
    start_metrics(&config);

    let gateway = Gateway::from_config(&config)?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling");
            trigger.cancel();
        }
    });

    let result = run(&gateway, &cancel, lookup).await;
    gateway.close();

    let body = result?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn run(
    gateway: &Gateway,
    cancel: &CancellationToken,
    lookup: Lookup,
) -> Result<Value, Box<dyn std::error::Error>> {
    let body = match lookup {
        Lookup::Company { registry, id } => gateway.client(&registry)?.company(cancel, &id).await?,
        Lookup::Search { registry, query } => gateway.client(&registry)?.search(cancel, &query).await?,
        Lookup::Registries => serde_json::to_value(gateway.health())?,
    };
    Ok(body)
}

fn start_metrics(config: &GatewayConfig) {
    if !config.observability.metrics_enabled {
        return;
    }
    match config.observability.metrics_address.parse() {
        Ok(addr) => {
            if let Err(e) = metrics::init_metrics(addr) {
                tracing::error!(error = %e, "Failed to start metrics endpoint");
            }
        }
        Err(_) => tracing::error!(
            metrics_address = %config.observability.metrics_address,
            "Failed to parse metrics address"
        ),
    }
}
