//! Lornu AI Compute Agent
//!
//! Enumerates compute systems across configured providers, either once
//! (printing the result as JSON) or behind an HTTP API.

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lornu_compute::api::{self, ProviderSystems};
use lornu_compute::compute::{ComputeSystemManager, StateChangeEvent};
use lornu_compute::ComputeConfig;

/// Compute Agent - Multi-provider compute system enumeration
#[derive(Parser, Debug)]
#[command(name = "compute-agent", version, about)]
struct Cli {
    /// Path to the JSON provider configuration
    #[arg(long, env = "COMPUTE_CONFIG")]
    config: Option<PathBuf>,

    /// Run one enumeration, print it and exit
    #[arg(long, default_value = "false")]
    once: bool,

    /// Address the HTTP API listens on
    #[arg(long, default_value = "0.0.0.0:8080", env = "COMPUTE_LISTEN_ADDR")]
    listen: SocketAddr,

    /// Override the enumeration deadline from the config file
    #[arg(long, env = "COMPUTE_DEADLINE_SECS")]
    deadline_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .json()
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ComputeConfig::load(path)?,
        None => {
            warn!("No configuration given, starting without providers");
            ComputeConfig::default()
        }
    };
    if let Some(deadline_secs) = cli.deadline_secs {
        config.deadline_secs = deadline_secs;
        config.validate()?;
    }

    let catalog = config.build_catalog()?;
    let manager = Arc::new(ComputeSystemManager::new(
        Arc::new(catalog),
        config.fan_out_config(),
    ));

    manager.subscribe(|event: &StateChangeEvent| -> Result<()> {
        info!(
            provider = %event.system.provider_id,
            system = %event.system.id,
            state = %event.state,
            "Compute system state changed"
        );
        Ok(())
    });

    if cli.once {
        return run_once(&manager).await;
    }

    let app = api::router(manager);

    info!("Compute agent listening on {}", cli.listen);
    let listener = tokio::net::TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("Failed to bind {}", cli.listen))?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Run a single enumeration pass and print the results
async fn run_once(manager: &ComputeSystemManager) -> Result<()> {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let sink = collected.clone();

    let summary = manager
        .enumerate(move |data| {
            info!(
                provider = %data.provider_id(),
                systems = data.system_count(),
                failed_identities = data.failed().count(),
                "Provider enumeration complete"
            );
            sink.lock().push(ProviderSystems::from(data));
        })
        .await?;

    let providers = std::mem::take(&mut *collected.lock());
    let output = serde_json::json!({
        "providers": providers,
        "summary": summary
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
