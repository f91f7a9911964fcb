use std::{error::Error, fmt, io};

use comms::FrameError;

/// The client module's result type.
pub type Result<T> = std::result::Result<T, OffloadError>;

/// All errors that can occur while offloading.
#[derive(Debug)]
pub enum OffloadError {
    /// A send was attempted while the connection was not open.
    NotConnected,
    /// Reconnection gave up after the configured amount of attempts.
    ReconnectExhausted { attempts: u32 },
    /// A required collaborator or setting is missing, this is a wiring bug.
    Configuration(String),
    /// An outbound frame could not be built or an inbound one decoded.
    MalformedFrame(FrameError),
    /// The remote worker's answer could not be understood.
    MalformedResponse(serde_json::Error),
    /// The remote worker reported a failure for the last offload.
    Remote(String),
    /// A local inference call failed.
    Inference(String),
    /// An underlying I/O error not covered by the above variants.
    Io(io::Error),
}

impl fmt::Display for OffloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::ReconnectExhausted { attempts } => {
                write!(f, "reconnect gave up after {attempts} attempts")
            }
            Self::Configuration(msg) => write!(f, "configuration error: {msg}"),
            Self::MalformedFrame(e) => write!(f, "{e}"),
            Self::MalformedResponse(e) => write!(f, "malformed response: {e}"),
            Self::Remote(msg) => write!(f, "remote error: {msg}"),
            Self::Inference(msg) => write!(f, "inference error: {msg}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for OffloadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::MalformedFrame(e) => Some(e),
            Self::MalformedResponse(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for OffloadError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<FrameError> for OffloadError {
    fn from(value: FrameError) -> Self {
        Self::MalformedFrame(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<OffloadError> for io::Error {
    fn from(value: OffloadError) -> Self {
        match value {
            OffloadError::Io(e) => e,
            OffloadError::NotConnected => io::Error::new(io::ErrorKind::NotConnected, value),
            other => io::Error::other(other),
        }
    }
}
