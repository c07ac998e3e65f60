//! Control channel to the hypervisor's management protocol: newline-framed
//! JSON over Unix stream sockets. Two sockets are held open, the second one
//! ("yank") so an out-of-band abort can be issued while the first is stuck
//! on a command.

pub mod channel;
mod client;
mod error;
pub mod json;

pub use channel::{ChannelError, LineReader, LineWriter};
pub use client::{EventSubscription, Qmp, QmpClient, Response};
pub use error::{Error, Result};
