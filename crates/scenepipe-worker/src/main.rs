//! Result consumer binary.
//!
//! Runs the SfM and NeRF result consumers, each on its own task with its
//! own broker connection, until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info};

use scenepipe_queue::{BrokerConfig, RedisConnector};
use scenepipe_sampler::{FrameSampler, SamplerConfig};
use scenepipe_worker::{
    init_tracing, metrics, ArtifactStore, ArtifactTransfer, ConsumerConfig, HttpTransfer,
    JsonSceneStore, NerfResultHandler, ResultConsumer, SceneManager, SfmResultHandler,
    WorkerConfig,
};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for HTTPS artifact URLs)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting scenepipe-worker");

    if let Err(e) = run().await {
        error!("Worker failed: {:#}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

async fn run() -> anyhow::Result<()> {
    let broker_config = BrokerConfig::from_env();
    let worker_config = WorkerConfig::from_env();
    let sampler_config = SamplerConfig::from_env();
    info!("Broker config: {:?}", broker_config);
    info!("Worker config: {:?}", worker_config);
    info!("Sampler config: {:?}", sampler_config);

    if let Some(addr) = worker_config.metrics_addr {
        metrics::init_metrics(addr)?;
        info!("Serving metrics on {}", addr);
    }

    let connector = RedisConnector::new(broker_config.clone())?;
    let transfer: Arc<dyn ArtifactTransfer> =
        Arc::new(HttpTransfer::new(worker_config.download_timeout)?);
    let artifacts = ArtifactStore::new(&worker_config.data_dir);
    let scenes: Arc<dyn SceneManager> = Arc::new(JsonSceneStore::new(&worker_config.data_dir));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_config = ConsumerConfig::new(&broker_config, &worker_config);

    let sfm_handler = SfmResultHandler::new(
        Arc::clone(&transfer),
        artifacts.clone(),
        Arc::clone(&scenes),
        FrameSampler::new(sampler_config),
    )
    .with_max_download_parallel(worker_config.max_download_parallel);
    let nerf_handler = NerfResultHandler::new(transfer, artifacts, scenes);

    let (sfm, nerf) = tokio::try_join!(
        ResultConsumer::connect(&connector, sfm_handler, consumer_config.clone(), shutdown_rx.clone()),
        ResultConsumer::connect(
            &connector,
            nerf_handler,
            consumer_config.with_ack_on_success(worker_config.nerf_ack_on_success),
            shutdown_rx,
        ),
    )
    .context("connecting result consumers")?;

    let sfm_task = tokio::spawn(sfm.run());
    let nerf_task = tokio::spawn(nerf.run());

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("Received shutdown signal");
    let _ = shutdown_tx.send(true);

    let (sfm_stats, nerf_stats) = tokio::join!(sfm_task, nerf_task);
    info!("SfM consumer: {:?}", sfm_stats?);
    info!("NeRF consumer: {:?}", nerf_stats?);

    Ok(())
}
