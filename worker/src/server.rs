use std::{io, sync::Arc};

use comms::Clock;
use log::{error, info, warn};
use tokio::net::TcpListener;

use crate::{RemoteInference, Session};

/// Accepts clients forever, each one gets its own session task.
///
/// # Arguments
/// * `listener` - The bound listener.
/// * `executor` - The remote inference engine shared by every session.
/// * `clock` - The worker's clock.
///
/// # Errors
/// Only if accepting fails, session failures are logged and dropped.
pub async fn run<E>(listener: TcpListener, executor: Arc<E>, clock: Clock) -> io::Result<()>
where
    E: RemoteInference + Sync + 'static,
{
    loop {
        let (stream, addr) = listener.accept().await?;

        if let Err(e) = stream.set_nodelay(true) {
            warn!("could not disable nagle for {addr}: {e}");
        }

        let (rx, tx) = stream.into_split();
        let (rx, tx) = comms::channel(rx, tx);
        let session = Session::new(Arc::clone(&executor), clock);
        info!("client connected from {addr}");

        tokio::spawn(async move {
            match session.run(rx, tx).await {
                Ok(answered) => info!(answered = answered; "client {addr} disconnected"),
                Err(e) => error!("session with {addr} failed: {e}"),
            }
        });
    }
}
