use std::{env, io, num::NonZeroUsize, str::FromStr, sync::Arc, time::Duration};

use comms::Clock;
use log::{error, info};
use tokio::{net::TcpListener, signal};

use worker::{SyntheticExecutor, health, server};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_CLASSES: usize = 1000;

/// Reads `key` from the environment, falling back to `default` when unset.
fn env_or<T: FromStr>(key: &str, default: T) -> io::Result<T> {
    match env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|_| io::Error::other(format!("invalid value for {key}: {value}"))),
        Err(_) => Ok(default),
    }
}

/// The port next to the offload port, below it when there is none above.
fn default_health_port(port: u16) -> u16 {
    port.checked_add(1).unwrap_or(port - 1)
}

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let host = env::var("HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
    let port: u16 = env_or("PORT", DEFAULT_PORT)?;
    let classes = NonZeroUsize::new(env_or("CLASSES", DEFAULT_CLASSES)?)
        .ok_or_else(|| io::Error::other("CLASSES must be positive"))?;
    let latency = Duration::from_millis(env_or("SIMULATED_LATENCY_MS", 0)?);

    let health_port: u16 = env_or("HEALTH_PORT", default_health_port(port))?;

    let health_addr = format!("{host}:{health_port}");
    let health_listener = TcpListener::bind(&health_addr).await?;
    info!("health check at http://{health_addr}/health");

    tokio::spawn(async move {
        if let Err(e) = health::serve(health_listener).await {
            error!("health endpoint failed: {e}");
        }
    });

    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("listening at {addr}");

    let executor = Arc::new(SyntheticExecutor::new(classes, latency));

    tokio::select! {
        ret = server::run(listener, executor, Clock::new()) => ret?,
        _ = signal::ctrl_c() => {
            info!("received SIGTERM");
        }
    }

    Ok(())
}
