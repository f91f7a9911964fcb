pub mod backoff;
pub mod bandit;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod inference;
pub mod latency;
pub mod policy;
pub mod record;

pub use comms::Clock;
pub use config::OffloadConfig;
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState, Connector, TcpConnector};
pub use coordinator::{OffloadCoordinator, TickOutcome};
pub use error::{OffloadError, Result};
pub use policy::{SplitPoint, SplitPolicy};
pub use record::{LogBook, LogRecord};
