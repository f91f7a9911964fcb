mod deserialize;
pub mod clock;
pub mod error;
pub mod frame;
pub mod msg;
mod protocol;
mod receiver;
mod sender;
mod serialize;
pub mod specs;

use tokio::io::{AsyncRead, AsyncWrite};

pub use clock::Clock;
pub use deserialize::Deserialize;
pub use error::FrameError;
pub use receiver::WireReceiver;
pub use sender::WireSender;
pub use serialize::Serialize;

type LenType = u64;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// Upper bound for a single transport message, larger length prefixes are
/// treated as a corrupted stream.
pub const MAX_MSG_LEN: usize = 64 * 1024 * 1024;

/// Creates both `WireReceiver` and `WireSender` network channel parts.
///
/// Given a writer and reader creates and returns both ends of the communication.
///
/// # Arguments
/// * `rx` - An async readable.
/// * `tx` - An async writable.
///
/// # Returns
/// A communication stream in the form of a wire receiver and sender.
pub fn channel<R, W>(rx: R, tx: W) -> (WireReceiver<R>, WireSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (WireReceiver::new(rx), WireSender::new(tx))
}
