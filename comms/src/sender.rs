//! The implementation of the sending end of the transport protocol.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{
    LEN_TYPE_SIZE, LenType, Serialize,
    msg::{CloseCode, Msg},
};

/// The sending end handle of the communication.
///
/// A `send` future dropped halfway through leaves a partly written message
/// on the stream. The sender then refuses to write anything else, since the
/// peer could no longer find where the next message starts.
pub struct WireSender<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
    buf: Vec<u8>,
    torn: bool,
}

impl<W: AsyncWrite + Unpin> WireSender<W> {
    /// Creates a new `WireSender` instance.
    ///
    /// # Arguments
    /// * `tx` - The underlying writer.
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            buf: Vec::new(),
            torn: false,
        }
    }

    /// Sends `msg` through the inner sender.
    ///
    /// # Arguments
    /// * `msg` - A serializable object.
    ///
    /// # Returns
    /// A result object that returns `io::Error` on failure, `BrokenPipe` if an
    /// earlier message was left half written.
    pub async fn send<'a, T: Serialize<'a>>(&mut self, msg: &'a T) -> io::Result<()> {
        if self.torn {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "an earlier message was only partly written",
            ));
        }

        let Self { buf, tx, torn } = self;

        buf.clear();
        buf.resize(LEN_TYPE_SIZE, 0);

        let zero_copy_data = msg.serialize(buf);
        let len = buf.len() - LEN_TYPE_SIZE + zero_copy_data.map(<[_]>::len).unwrap_or_default();
        let header = (len as LenType).to_be_bytes();
        buf[..header.len()].copy_from_slice(&header);

        *torn = true;
        tx.write_all(buf).await?;

        if let Some(data) = zero_copy_data {
            tx.write_all(data).await?;
        }

        tx.flush().await?;
        *torn = false;
        Ok(())
    }

    /// Whether a message was left half written.
    pub fn is_torn(&self) -> bool {
        self.torn
    }

    /// Ends the connection, announcing `code` first when the stream is still
    /// at a message boundary.
    ///
    /// # Arguments
    /// * `code` - The close status sent to the peer.
    pub async fn close(&mut self, code: CloseCode) -> io::Result<()> {
        if !self.torn {
            self.send(&Msg::Close(code)).await?;
        }

        self.shutdown().await
    }

    /// Shuts down the underlying writer without a close message.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.tx.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{io::AsyncReadExt, time};

    use super::*;

    #[tokio::test]
    async fn abandoned_send_refuses_further_messages() {
        let (local, mut remote) = tokio::io::duplex(8);
        let mut tx = WireSender::new(local);

        let payload = [0u8; 64];
        let res = time::timeout(Duration::from_millis(10), tx.send(&Msg::Binary(&payload))).await;
        assert!(res.is_err());
        assert!(tx.is_torn());

        let err = tx.send(&Msg::Binary(&[1])).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

        // No close message after a torn one, only the shutdown.
        tx.close(CloseCode::NORMAL).await.unwrap();

        let mut written = Vec::new();
        remote.read_to_end(&mut written).await.unwrap();
        assert_eq!(written.len(), 8);
    }

    #[tokio::test]
    async fn close_announces_the_code() {
        let (local, remote) = tokio::io::duplex(64);
        let (rx, _) = tokio::io::split(remote);
        let mut rx = crate::WireReceiver::new(rx);
        let mut tx = WireSender::new(local);

        tx.close(CloseCode::NORMAL).await.unwrap();

        let mut buf = Vec::new();
        let msg: Msg = rx.recv_into(&mut buf).await.unwrap();
        assert_eq!(msg, Msg::Close(CloseCode::NORMAL));
    }
}
