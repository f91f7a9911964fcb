//! Wire-level types exchanged between the client and the remote worker.

mod envelope;
mod metadata;

pub use envelope::{Envelope, TopK, WireResponse};
pub use metadata::MessageMetadata;
