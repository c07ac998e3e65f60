//! Core types shared between the colod services: the event alphabet of the
//! main state machine, role/status snapshots and the configurable
//! hypervisor command table.

mod commands;
mod event;
mod state;

pub use commands::CommandStore;
pub use event::Event;
pub use state::{Role, Status};
