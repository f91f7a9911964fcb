mod engine;

use std::{
    env,
    fs::File,
    io::BufWriter,
    num::NonZeroUsize,
    str::FromStr,
};

use anyhow::{Context, anyhow};
use client::{
    Clock, ConnectionManager, OffloadConfig, OffloadCoordinator, SplitPoint, SplitPolicy,
    TcpConnector, inference::Tensor,
};
use log::info;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use engine::SyntheticEngine;

const DEFAULT_ENDPOINT: &str = "127.0.0.1:8080";
const DEFAULT_CANDIDATES: &str = "no_offload,full_offload,block_1,block_2";
const ADAPTIVE: &str = "adaptive";
const CLASSES: usize = 1000;
const INPUT_SHAPE: [usize; 4] = [1, 3, 32, 32];

/// Reads `key` from the environment, falling back to `default` when unset.
fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("invalid value for {key}: {value}")),
        Err(_) => Ok(default),
    }
}

fn split_policy() -> anyhow::Result<SplitPolicy> {
    let split = env::var("SPLIT_LAYER_NAME").unwrap_or_else(|_| ADAPTIVE.to_string());

    if split != ADAPTIVE {
        return Ok(SplitPolicy::Fixed(split.parse()?));
    }

    let candidates = env::var("SPLIT_CANDIDATES").unwrap_or_else(|_| DEFAULT_CANDIDATES.into());
    let candidates = candidates
        .split(',')
        .map(SplitPoint::from_str)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SplitPolicy::adaptive(candidates)?)
}

/// A slowly changing synthetic camera frame.
fn camera() -> impl FnMut() -> Option<Tensor> {
    let mut frame = 0u32;

    move || {
        frame = frame.wrapping_add(1);
        let numel: usize = INPUT_SHAPE.iter().product();
        let data = (0..numel)
            .map(|i| ((i as f32 + frame as f32) * 0.01).sin())
            .collect();

        Tensor::new(data, INPUT_SHAPE.to_vec())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = OffloadConfig::new(
        env_or("OFFLOAD_ENDPOINT", DEFAULT_ENDPOINT.to_string())?,
        env_or("RECONNECT_DELAY_MS", 1000)?,
        env_or("MAX_RECONNECT_ATTEMPTS", 5)?,
        env_or("TICK_INTERVAL_MS", 1000)?,
    )?
    .with_input_layer_name(env_or("INPUT_LAYER_NAME", "input".to_string())?);
    config.validate()?;

    let policy = split_policy()?;
    info!(endpoint = config.endpoint.as_str(), adaptive = policy.bandit().is_some(); "starting experiment");

    let classes = NonZeroUsize::new(CLASSES).ok_or_else(|| anyhow!("no classes"))?;
    let clock = Clock::new();
    let mut coordinator =
        OffloadCoordinator::new(&config, SyntheticEngine::new(classes), policy, clock);

    if coordinator.policy().may_offload() {
        let connector = TcpConnector::new(config.endpoint.clone());
        let (manager, events) = ConnectionManager::new(connector, &config, clock);
        coordinator = coordinator.with_connection(manager, events);
    }

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if signal::ctrl_c().await.is_ok() {
                info!("received SIGTERM");
            }
            shutdown.cancel();
        }
    });

    let log = coordinator.run(camera(), shutdown).await?;
    info!(records = log.len(); "experiment finished");

    if let Ok(path) = env::var("EXPORT_PATH") {
        let file = File::create(&path).with_context(|| format!("creating {path}"))?;
        log.export_json(BufWriter::new(file))?;
        info!("exported the log to {path}");
    }

    Ok(())
}
