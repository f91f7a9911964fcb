pub mod error;
pub mod executor;
pub mod health;
pub mod server;
pub mod session;

pub use error::{Result, WorkerErr};
pub use executor::{RemoteInference, RemoteOutput, SyntheticExecutor};
pub use session::Session;
