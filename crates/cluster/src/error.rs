use std::io;

use thiserror::Error;

/// An error occurring in the group-messaging adapter.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error on the underlying bus.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The bus or a bridging channel went away.
    #[error("group messaging bus disconnected")]
    Disconnected,

    /// A delivery that is not exactly one opcode wide.
    #[error("got message of invalid length {0}")]
    InvalidLength(usize),

    /// A delivery with an opcode this daemon does not speak.
    #[error("unknown group message opcode {0}")]
    UnknownOpcode(u32),
}
