//! Publish SfM and NeRF jobs from the command line.
//!
//! ```text
//! scenepipe-enqueue sfm <id> <video path under WORKER_DATA_DIR>
//! scenepipe-enqueue nerf <id>
//! ```
//!
//! The NeRF job is built from the scene record written by the SfM consumer.

use anyhow::{anyhow, bail, Context};

use scenepipe_models::{JobId, Video};
use scenepipe_queue::{BrokerConfig, JobPublisher, PublisherConfig, RedisConnector};
use scenepipe_worker::{init_tracing, JsonSceneStore, SceneManager, WorkerConfig};

const USAGE: &str = "usage: scenepipe-enqueue sfm <id> <video-path> | scenepipe-enqueue nerf <id>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("failed to install rustls crypto provider"))?;
    dotenvy::dotenv().ok();
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str);
    let id = args.get(1).map(|s| JobId::from(s.as_str()));

    let worker_config = WorkerConfig::from_env();
    let broker_config = BrokerConfig::from_env();
    let scenes = JsonSceneStore::new(&worker_config.data_dir);

    match (command, id) {
        (Some("sfm"), Some(id)) => {
            let path = args.get(2).context(USAGE)?;
            let video = Video::from_file(path.as_str());
            scenes.set_video(&id, video.clone()).await?;

            let mut publisher = connect(&broker_config).await?;
            let tag = publisher.publish_sfm_job(&id, &video).await?;
            println!("scenepipe-enqueue: sfm job {} queued as {}", id, tag);
        }
        (Some("nerf"), Some(id)) => {
            let record = scenes
                .get(&id)
                .await?
                .ok_or_else(|| anyhow!("no scene record for {}", id))?;
            let video = record.video.ok_or_else(|| anyhow!("{} has no video", id))?;
            let sfm = record
                .sfm
                .ok_or_else(|| anyhow!("{} has no reconstruction yet", id))?;

            let mut publisher = connect(&broker_config).await?;
            let tag = publisher.publish_nerf_job(&id, &video, &sfm).await?;
            println!("scenepipe-enqueue: nerf job {} queued as {}", id, tag);
        }
        _ => bail!(USAGE),
    }

    Ok(())
}

async fn connect(
    config: &BrokerConfig,
) -> anyhow::Result<JobPublisher<scenepipe_queue::RedisBroker>> {
    let connector = RedisConnector::new(config.clone())?;
    let publisher =
        JobPublisher::connect(&connector, PublisherConfig::from_env(), config.connect_deadline)
            .await?;
    Ok(publisher)
}
