//! gatelink - keeps a gateway session alive and logs its events.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use gatelink::gateway::GatewayEvent;
use gatelink::{GatewayClient, GatewayConfig, HttpDiscovery};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "gatelink")]
#[command(about = "Resilient event gateway client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and log gateway events until Ctrl-C
    Run {
        /// Path to config file
        #[arg(short, long, default_value = "gatelink.json")]
        config: PathBuf,

        /// Token, overriding the config file
        #[arg(long, env = "GATELINK_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "gatelink.json")]
        output: PathBuf,

        /// REST API URL used for gateway discovery
        #[arg(long, default_value = "https://api.example.com")]
        api_url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("gatelink=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, token } => run(config, token).await?,
        Commands::InitConfig { output, api_url } => init_config(output, api_url)?,
    }

    Ok(())
}

async fn run(config_path: PathBuf, token: Option<String>) -> anyhow::Result<()> {
    info!(config = %config_path.display(), "starting gatelink");

    let mut config = GatewayConfig::from_file(&config_path)?;
    if let Some(token) = token {
        config = config.with_token(&token);
        config.validate()?;
    }
    info!(
        api_url = %config.api_url,
        version = config.version,
        shard = ?config.shard,
        "loaded config"
    );

    let discovery = HttpDiscovery::new(
        config.api_url.clone(),
        config.version,
        config.token.clone(),
        config.rest_timeout(),
    )?;
    let (client, mut events) = GatewayClient::new(&config, discovery);
    let handle = client.handle();

    let driver = tokio::spawn(client.run());

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl-C, shutting down");
                if let Err(e) = handle.shutdown() {
                    warn!(error = %e, "client already stopped");
                }
            }
        }
    }

    match driver.await? {
        Ok(()) => {
            info!("gatelink stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "gateway client failed");
            Err(e.into())
        }
    }
}

fn log_event(event: &GatewayEvent) {
    match event {
        GatewayEvent::Ready { session_id, .. } => info!(%session_id, "session ready"),
        GatewayEvent::Resumed { replayed } => info!(replayed = ?replayed, "session resumed"),
        GatewayEvent::Closed(close) => info!(%close, "connection closed"),
        GatewayEvent::Destroyed => info!("connection destroyed"),
        GatewayEvent::Dispatch {
            event, sequence, ..
        } => info!(%event, sequence = ?sequence, "dispatch"),
        GatewayEvent::Raw(frame) => debug!(op = ?frame.op, sequence = ?frame.s, "frame"),
        GatewayEvent::Reconnecting { delay } => {
            info!(delay_ms = delay.as_millis() as u64, "reconnecting");
        }
        GatewayEvent::Disconnected(close) => warn!(%close, "disconnected for good"),
        GatewayEvent::Error(e) => warn!(error = %e, "gateway error"),
    }
}

fn init_config(output: PathBuf, api_url: String) -> anyhow::Result<()> {
    let config = GatewayConfig::new(api_url);
    config.validate()?;
    std::fs::write(&output, config.to_json()?)?;

    println!("Config written to {}", output.display());
    println!();
    println!("Add your token to the file (or set GATELINK_TOKEN), then run:");
    println!("  gatelink run --config {}", output.display());

    Ok(())
}
