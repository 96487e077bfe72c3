use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use metric_sentinel::{
    api::{ApiConfig, HubState, spawn_hub_server},
    config::{Config, read_config_file},
    identity::{IdentityResolver, StoreDirectory},
    storage::open_backend,
    thresholds::ThresholdRegistry,
    util::apply_hub_env,
};
use tracing::{info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: Option<String>,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("metric_sentinel", LevelFilter::DEBUG),
        ("sentinel_hub", LevelFilter::TRACE),
        ("tower_http", LevelFilter::INFO),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = match &args.file {
        Some(file) => read_config_file(file)?,
        None => Config::default(),
    };

    let mut hub_config = config.hub.clone().unwrap_or_default();
    apply_hub_env(&mut hub_config);

    let storage = open_backend(config.storage.as_ref())
        .await
        .context("failed to open storage")?;

    let thresholds = Arc::new(ThresholdRegistry::new());
    thresholds.load(
        storage
            .load_definitions()
            .await
            .context("failed to load metric definitions")?,
    );
    info!("{} metric definitions loaded", thresholds.len());

    let resolver = Arc::new(IdentityResolver::with_cache(
        Arc::new(StoreDirectory::new(storage.clone())),
        Duration::from_secs(hub_config.identity_cache_ttl_secs),
        hub_config.identity_cache_capacity,
    ));

    let state = HubState::new(storage.clone(), thresholds, resolver)
        .with_alert_stream_timeout(hub_config.alert_stream_timeout());

    spawn_hub_server(
        ApiConfig::new(hub_config.bind, hub_config.allowed_origins.clone()),
        state,
    )
    .await
    .context("failed to start hub server")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");

    storage.close().await?;

    Ok(())
}
