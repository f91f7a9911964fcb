#![allow(dead_code)]

use std::{
    collections::VecDeque,
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
};

use client::{Connector, OffloadConfig};
use comms::{WireReceiver, WireSender};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

/// Hands out queued in-memory streams, refusing once the queue runs dry.
#[derive(Clone, Default)]
pub struct QueueConnector {
    streams: Arc<Mutex<VecDeque<DuplexStream>>>,
    attempts: Arc<AtomicU32>,
}

impl QueueConnector {
    /// Queues a new stream and returns the remote worker's end of it.
    pub fn push(&self) -> DuplexStream {
        let (local, remote) = tokio::io::duplex(4096);
        self.streams.lock().unwrap().push_back(local);
        remote
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for QueueConnector {
    type Reader = ReadHalf<DuplexStream>;
    type Writer = WriteHalf<DuplexStream>;

    async fn connect(&self) -> io::Result<(Self::Reader, Self::Writer)> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let stream = self.streams.lock().unwrap().pop_front();
        match stream {
            Some(stream) => Ok(tokio::io::split(stream)),
            None => Err(io::ErrorKind::ConnectionRefused.into()),
        }
    }
}

pub fn config(max_reconnect_attempts: u32) -> OffloadConfig {
    OffloadConfig::new("in-memory", 100, max_reconnect_attempts, 50).unwrap()
}

pub fn remote_channel(
    stream: DuplexStream,
) -> (
    WireReceiver<ReadHalf<DuplexStream>>,
    WireSender<WriteHalf<DuplexStream>>,
) {
    let (rx, tx) = tokio::io::split(stream);
    comms::channel(rx, tx)
}
