//! The finite-state controller of replication and its supporting pieces:
//! the two-priority event queue, the shared status flags, the execute
//! wrappers, the health check, the raise-timeout helper and the watchdog.

mod error;
mod exec;
pub mod health;
mod machine;
mod queue;
mod raise_timeout;
mod sources;
mod status;
mod watchdog;

pub use error::Error;
pub use exec::{execute, execute_nocheck};
pub use machine::{request_start_migration, Machine};
pub use queue::EventQueue;
pub use raise_timeout::RaiseTimeout;
pub use status::SharedStatus;
pub use watchdog::{Watchdog, WatchdogHandle};
