//! The persistent connection to the remote worker.
//!
//! A background task owns the transport lifecycle: it opens the connection,
//! forwards every inbound message as a `ConnectionEvent`, and reconnects with
//! exponential backoff after abnormal closures. The `ConnectionManager` handle
//! sends frames and tears the task down.

use std::{future::Future, io, sync::Arc, time::Duration};

use comms::{
    Clock, WireSender,
    msg::{CloseCode, Msg},
};
use log::{debug, error, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
    time,
};
use tokio_util::sync::CancellationToken;

use crate::{OffloadError, backoff::Backoff, config::OffloadConfig};

/// How long closing may wait on a peer that does not read.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// The lifecycle state of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// An inbound message and the moment it was read.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub bytes: Vec<u8>,
    /// Milliseconds on the client clock, taken right after the read completed.
    pub received_at: f64,
}

/// What the connection task reports to its owner, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Opened,
    Frame(Inbound),
    /// The transport closed or failed to open, `ABNORMAL` when no close code was received.
    Closed { code: CloseCode },
    /// Reconnection stopped for good.
    GaveUp { attempts: u32 },
}

/// Opens the underlying transport.
pub trait Connector: Send + Sync + 'static {
    type Reader: AsyncRead + Unpin + Send + 'static;
    type Writer: AsyncWrite + Unpin + Send + 'static;

    /// Opens a fresh transport to the remote worker.
    fn connect(&self) -> impl Future<Output = io::Result<(Self::Reader, Self::Writer)>> + Send;
}

/// Connects over tcp.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    /// Creates a new `TcpConnector`.
    ///
    /// # Arguments
    /// * `addr` - The remote worker's address, `host:port`.
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl Connector for TcpConnector {
    type Reader = OwnedReadHalf;
    type Writer = OwnedWriteHalf;

    async fn connect(&self) -> io::Result<(OwnedReadHalf, OwnedWriteHalf)> {
        let stream = TcpStream::connect(self.addr.as_str()).await?;
        stream.set_nodelay(true)?;
        Ok(stream.into_split())
    }
}

/// The sending half of the open transport.
struct Link<W: AsyncWrite + Unpin> {
    tx: WireSender<W>,
    /// Tells the connection task the transport can no longer be written to.
    broken: CancellationToken,
}

/// State shared between the handle and the connection task.
struct Shared<C: Connector> {
    connector: C,
    clock: Clock,
    base_delay: Duration,
    max_attempts: u32,
    state: watch::Sender<ConnectionState>,
    writer: Mutex<Option<Link<C::Writer>>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    shutdown: CancellationToken,
}

/// Owns the single connection to the remote worker.
pub struct ConnectionManager<C: Connector> {
    shared: Arc<Shared<C>>,
    driver: Option<JoinHandle<()>>,
}

impl<C: Connector> ConnectionManager<C> {
    /// Creates a new `ConnectionManager`, no transport is opened until `connect`.
    ///
    /// # Arguments
    /// * `connector` - Opens the transport.
    /// * `config` - Supplies the reconnect policy.
    /// * `clock` - The clock inbound receipt times are taken from.
    ///
    /// # Returns
    /// The manager and the receiving end of its events.
    pub fn new(
        connector: C,
        config: &OffloadConfig,
        clock: Clock,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        let shared = Shared {
            connector,
            clock,
            base_delay: config.reconnect_delay(),
            max_attempts: config.max_reconnect_attempts,
            state,
            writer: Mutex::new(None),
            events,
            shutdown: CancellationToken::new(),
        };

        let manager = Self {
            shared: Arc::new(shared),
            driver: None,
        };

        (manager, events_rx)
    }

    /// The current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Observes state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Waits until the connection is open.
    pub async fn wait_until_open(&self) {
        let mut state = self.subscribe();
        // The sender lives in `self`, so this only returns once open.
        let _ = state.wait_for(|s| *s == ConnectionState::Open).await;
    }

    /// Starts the connection task.
    ///
    /// Does nothing when the connection is open, the task is already running
    /// or the manager was closed.
    pub fn connect(&mut self) {
        if self.shared.shutdown.is_cancelled() {
            debug!("connection was closed, ignoring connect");
            return;
        }

        if self.state() == ConnectionState::Open
            || self.driver.as_ref().is_some_and(|d| !d.is_finished())
        {
            return;
        }

        let shared = Arc::clone(&self.shared);
        self.driver = Some(tokio::spawn(shared.drive()));
    }

    /// Sends `frame` as a binary message right away.
    ///
    /// The write is abandoned once `close` is called. Dropping the returned
    /// future also abandons it, and the next `send` then has the transport
    /// re-established.
    ///
    /// # Arguments
    /// * `frame` - The encoded frame.
    ///
    /// # Errors
    /// `NotConnected` unless the connection is open or when it closes midway,
    /// `Io` if the write failed.
    pub async fn send(&self, frame: &[u8]) -> crate::Result<()> {
        if self.state() != ConnectionState::Open {
            return Err(OffloadError::NotConnected);
        }

        let shutdown = &self.shared.shutdown;
        let mut writer = tokio::select! {
            _ = shutdown.cancelled() => return Err(OffloadError::NotConnected),
            writer = self.shared.writer.lock() => writer,
        };
        let Some(link) = writer.as_mut() else {
            return Err(OffloadError::NotConnected);
        };

        if link.tx.is_torn() {
            // A dropped send left half a message behind, start over on a new transport.
            link.broken.cancel();
            return Err(OffloadError::NotConnected);
        }

        // A peer that stops reading must not keep the lock past `close`.
        let msg = Msg::Binary(frame);
        let res = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("connection closing, abandoning a pending send");
                return Err(OffloadError::NotConnected);
            }
            res = link.tx.send(&msg) => res,
        };

        if let Err(e) = res {
            warn!("failed to send frame: {e}");
            return Err(e.into());
        }

        debug!(bytes = frame.len(); "frame sent");
        Ok(())
    }

    /// Closes the connection with a normal closure and stops reconnecting.
    ///
    /// Safe to call any number of times.
    pub async fn close(&mut self) {
        self.shared.shutdown.cancel();

        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                error!("connection task failed: {e}");
            }
        }

        self.shared.state.send_replace(ConnectionState::Disconnected);
    }
}

impl<C: Connector> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

impl<C: Connector> Shared<C> {
    /// The connection task, runs until a normal closure, shutdown or giving up.
    async fn drive(self: Arc<Self>) {
        let mut backoff = Backoff::new(self.base_delay, self.max_attempts);

        loop {
            self.state.send_replace(ConnectionState::Connecting);

            let code = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                res = self.connector.connect() => match res {
                    Ok((rx, tx)) => {
                        backoff.reset();
                        self.serve(rx, tx).await
                    }
                    Err(e) => {
                        warn!("failed to connect: {e}");
                        CloseCode::ABNORMAL
                    }
                },
            };

            self.emit(ConnectionEvent::Closed { code });

            if code.is_normal() || self.shutdown.is_cancelled() {
                info!(code = code.0; "connection closed");
                break;
            }

            let Some(delay) = backoff.next_delay() else {
                let attempts = backoff.attempts();
                error!(attempts = attempts; "reconnect attempts exhausted, giving up");
                self.emit(ConnectionEvent::GaveUp { attempts });
                break;
            };

            self.state.send_replace(ConnectionState::Connecting);
            warn!(code = code.0, attempt = backoff.attempts(); "connection lost, reconnecting in {delay:?}");

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = time::sleep(delay) => {}
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
    }

    /// Serves one open transport until it closes.
    ///
    /// # Returns
    /// The close code of the transport.
    async fn serve(&self, rx: C::Reader, tx: C::Writer) -> CloseCode {
        let (mut rx, tx) = comms::channel(rx, tx);
        let broken = CancellationToken::new();
        *self.writer.lock().await = Some(Link {
            tx,
            broken: broken.clone(),
        });
        self.state.send_replace(ConnectionState::Open);
        info!("connection established");
        self.emit(ConnectionEvent::Opened);

        let mut buf = Vec::new();
        let code = loop {
            let msg = tokio::select! {
                _ = self.shutdown.cancelled() => break CloseCode::NORMAL,
                _ = broken.cancelled() => {
                    warn!("a frame was left half written, dropping the connection");
                    break CloseCode::ABNORMAL;
                }
                msg = rx.recv_into::<Msg>(&mut buf) => msg,
            };
            let received_at = self.clock.now_ms();

            let bytes = match msg {
                Ok(Msg::Binary(bytes)) => bytes.to_vec(),
                Ok(Msg::Text(text)) => text.into_owned().into_bytes(),
                Ok(Msg::Close(code)) => {
                    info!(code = code.0; "peer closed the connection");
                    break code;
                }
                Err(e) => {
                    warn!("connection read failed: {e}");
                    break CloseCode::ABNORMAL;
                }
            };

            debug!(bytes = bytes.len(); "frame received");
            self.emit(ConnectionEvent::Frame(Inbound { bytes, received_at }));
        };

        self.state.send_replace(ConnectionState::Closing);
        let writer = self.writer.lock().await.take();

        if let Some(Link { mut tx, .. }) = writer {
            let teardown = async {
                if self.shutdown.is_cancelled() {
                    tx.close(CloseCode::NORMAL).await
                } else {
                    tx.shutdown().await
                }
            };

            match time::timeout(TEARDOWN_TIMEOUT, teardown).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("could not close the writer: {e}"),
                Err(_) => warn!("peer is not reading, dropping the connection"),
            }
        }

        code
    }

    fn emit(&self, event: ConnectionEvent) {
        if self.events.send(event).is_err() {
            debug!("connection events receiver is gone");
        }
    }
}
