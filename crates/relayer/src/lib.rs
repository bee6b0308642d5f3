pub mod callback;
pub mod coordinator;
pub mod error;
pub mod handlers;
pub mod poller;
pub mod router;
pub mod runner;
pub mod submitter;
pub mod trace;

pub use coordinator::Coordinator;
pub use error::{PolicyViolation, RelayError};
pub use runner::Relayer;
