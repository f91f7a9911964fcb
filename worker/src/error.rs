use std::{error::Error, fmt, io};

use comms::FrameError;

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Worker runtime failures.
#[derive(Debug)]
pub enum WorkerErr {
    Io(io::Error),
    Frame(FrameError),
    ShapeMismatch {
        expected: usize,
        got: usize,
    },
    UnexpectedMessage {
        got: &'static str,
    },
    Inference(String),
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Io(e) => write!(f, "io error: {e}"),
            WorkerErr::Frame(e) => write!(f, "{e}"),
            WorkerErr::ShapeMismatch { expected, got } => write!(
                f,
                "payload length mismatch: shape implies {expected} elements, got {got}"
            ),
            WorkerErr::UnexpectedMessage { got } => {
                write!(f, "unexpected message: expected a binary frame, got {got}")
            }
            WorkerErr::Inference(msg) => write!(f, "inference error: {msg}"),
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Io(e) => Some(e),
            WorkerErr::Frame(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<FrameError> for WorkerErr {
    fn from(value: FrameError) -> Self {
        Self::Frame(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<WorkerErr> for io::Error {
    fn from(value: WorkerErr) -> Self {
        match value {
            WorkerErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
