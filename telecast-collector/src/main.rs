use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use telecast_collector::{assemble, CollectorConfig};
use telecast_core::SystemClock;
use tokio_util::sync::CancellationToken;

/// Telecast telemetry collector
#[derive(Debug, Parser)]
#[command(name = "telecast-collector", version, about)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override `store.data_dir`
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Override `server.instance_id`
    #[arg(long, value_name = "ID")]
    instance_id: Option<String>,
}

fn load_config(cli: &Cli) -> anyhow::Result<CollectorConfig> {
    let mut config = match &cli.config {
        Some(path) => CollectorConfig::load(path)?,
        None => CollectorConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.store.data_dir = dir.clone();
    }
    if let Some(id) = &cli.instance_id {
        config.server.instance_id = id.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli).context("loading configuration")?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    log::info!(
        "telecast-collector {} starting as {}",
        env!("CARGO_PKG_VERSION"),
        config.server.instance_id
    );

    let collector = assemble(&config, Arc::new(SystemClock), CancellationToken::new()).await?;
    for (name, addr) in collector.bound() {
        log::info!("{name} listening on {addr}");
    }
    collector.run().await
}
