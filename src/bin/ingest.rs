use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use metric_sentinel::{
    actors::{
        fanout::FanoutHandle,
        intake::{IntakeHandle, IntakeSettings},
        liveness::LivenessHandle,
        replica::ReplicaHandle,
    },
    api::{ApiConfig, IngestState, spawn_ingest_server},
    client::HubClient,
    config::{Config, EvaluationMode, read_config_file},
    identity::IdentityResolver,
    intake::{IntakePipeline, LocalEvaluation, MetricForwarder, RawMetricPublisher},
    liveness::LivenessMonitor,
    queue::MemoryBroker,
    realtime::SessionRegistry,
    thresholds::{ThresholdRegistry, ThresholdReplica},
    util::apply_ingest_env,
};
use tracing::{error, info, level_filters::LevelFilter, trace};
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
        ("sentinel_ingest", LevelFilter::TRACE),
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

    let mut ingest = config.ingest.clone().unwrap_or_default();
    apply_ingest_env(&mut ingest);

    let hub = Arc::new(HubClient::new(
        &ingest.hub_url,
        Duration::from_secs(ingest.request_timeout_secs),
    )?);
    info!("reporting to hub at {}", hub.base_url());

    let broker = Arc::new(
        MemoryBroker::with_topics(ingest.topics.iter().cloned(), ingest.partitions)
            .context("failed to create topics")?,
    );

    let liveness = Arc::new(LivenessMonitor::new());
    let sessions = Arc::new(SessionRegistry::with_send_timeout(Duration::from_millis(
        ingest.session_send_timeout_ms,
    )));
    let raw_metrics = RawMetricPublisher::new(ingest.raw_queue_capacity);

    let resolver = Arc::new(IdentityResolver::with_cache(
        hub.clone(),
        Duration::from_secs(ingest.identity_cache_ttl_secs),
        ingest.identity_cache_capacity,
    ));

    let mut replica = None;
    let forwarder: Arc<dyn MetricForwarder> = match ingest.evaluation {
        EvaluationMode::Local => {
            let thresholds = Arc::new(ThresholdRegistry::new());
            replica = Some(ReplicaHandle::spawn(
                Arc::new(ThresholdReplica::new(thresholds.clone(), hub.clone())),
                Duration::from_secs(ingest.threshold_refresh_secs),
            ));
            Arc::new(LocalEvaluation::new(thresholds, hub.clone())) as Arc<dyn MetricForwarder>
        }
        EvaluationMode::Remote => hub.clone() as Arc<dyn MetricForwarder>,
    };

    let pipeline = Arc::new(IntakePipeline::new(
        raw_metrics.clone(),
        resolver,
        liveness.clone(),
        forwarder,
    ));

    let settings = IntakeSettings {
        batch_size: ingest.batch_size,
        poll_wait: Duration::from_millis(ingest.poll_wait_ms),
    };

    let mut workers = vec![];
    for topic in &ingest.topics {
        for _ in 0..ingest.consumer_concurrency.max(1) {
            let consumer = broker
                .subscribe(topic, &ingest.group_id)
                .with_context(|| format!("failed to subscribe to '{topic}'"))?;
            workers.push(IntakeHandle::spawn(
                Box::new(consumer),
                pipeline.clone(),
                settings,
            ));
        }
    }
    info!(
        "{} intake workers consuming {:?} as '{}'",
        workers.len(),
        ingest.topics,
        ingest.group_id
    );

    let liveness_actor = LivenessHandle::spawn(
        liveness.clone(),
        hub.clone(),
        Duration::from_secs(ingest.liveness_sweep_secs),
    );

    let fanout = FanoutHandle::spawn(
        sessions.clone(),
        raw_metrics.subscribe(),
        Duration::from_secs(ingest.session_sweep_secs),
    );

    let state = IngestState {
        sessions,
        broker,
        liveness,
        group_id: ingest.group_id.clone(),
        allowed_origins: Arc::new(ingest.allowed_origins.clone()),
    };

    spawn_ingest_server(
        ApiConfig::new(ingest.bind, ingest.allowed_origins.clone()),
        state,
    )
    .await
    .context("failed to start ingest server")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");

    for worker in &workers {
        if let Err(e) = worker.shutdown().await {
            error!("intake worker for '{}': {e:#}", worker.topic);
        }
    }
    if let Some(replica) = replica {
        if let Err(e) = replica.shutdown().await {
            error!("threshold refresh: {e:#}");
        }
    }
    if let Err(e) = liveness_actor.shutdown().await {
        error!("liveness: {e:#}");
    }
    if let Err(e) = fanout.shutdown().await {
        error!("fan-out: {e:#}");
    }

    Ok(())
}
