use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Deserialize, LEN_TYPE_SIZE, LenType, MAX_MSG_LEN};

/// The receiving end handle of the communication.
pub struct WireReceiver<R: AsyncRead + Unpin> {
    rx: R,
}

impl<R: AsyncRead + Unpin> WireReceiver<R> {
    /// Creates a new `WireReceiver` instance.
    ///
    /// # Arguments
    /// * `rx` - The underlying reader.
    pub(super) fn new(rx: R) -> Self {
        Self { rx }
    }

    /// Waits to receive a new message from the inner receiver.
    ///
    /// # Arguments
    /// * `buf` - The buffer to use for deserialization, the returned
    ///           `T`'s lifetimes will be tied to this buffer.
    ///
    /// # Returns
    /// A result object that returns `T` on success or `io::Error` on failure.
    /// A stream that ends in between messages yields `UnexpectedEof`.
    pub async fn recv_into<'buf, T>(&mut self, buf: &'buf mut Vec<u8>) -> io::Result<T>
    where
        T: Deserialize<'buf>,
    {
        let mut size_buf = [0; LEN_TYPE_SIZE];
        self.rx.read_exact(&mut size_buf).await?;
        let len = LenType::from_be_bytes(size_buf);

        if len > MAX_MSG_LEN as LenType {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Message length {len} exceeds the limit of {MAX_MSG_LEN} bytes"),
            ));
        }

        buf.clear();
        buf.resize(len as usize, 0);
        self.rx.read_exact(buf).await?;

        T::deserialize(buf)
    }
}
