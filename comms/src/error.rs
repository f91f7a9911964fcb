use std::{error::Error, fmt, io};

/// A frame that could not be decoded, the malformed frame family of errors.
#[derive(Debug)]
pub enum FrameError {
    /// The buffer cannot even hold the metadata length header.
    MissingHeader { len: usize },
    /// The header declares more metadata bytes than the buffer holds.
    MetadataLength { declared: usize, available: usize },
    /// The metadata block is not the expected JSON document.
    Metadata(serde_json::Error),
    /// The metadata parsed but carries values outside of their domain.
    InvalidMetadata(String),
    /// The payload does not split into whole 32-bit floats.
    PayloadAlignment { len: usize },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingHeader { len } => {
                write!(f, "malformed frame: {len} bytes cannot hold the length header")
            }
            Self::MetadataLength {
                declared,
                available,
            } => write!(
                f,
                "malformed frame: metadata length {declared} exceeds the {available} remaining bytes"
            ),
            Self::Metadata(e) => write!(f, "malformed frame: invalid metadata json: {e}"),
            Self::InvalidMetadata(msg) => write!(f, "malformed frame: {msg}"),
            Self::PayloadAlignment { len } => write!(
                f,
                "malformed frame: payload of {len} bytes is not a multiple of 4"
            ),
        }
    }
}

impl Error for FrameError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Metadata(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for FrameError {
    fn from(value: serde_json::Error) -> Self {
        Self::Metadata(value)
    }
}

/// Boundary conversion for I/O APIs.
impl From<FrameError> for io::Error {
    fn from(value: FrameError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, value)
    }
}
