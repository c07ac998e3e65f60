use std::io;

use thiserror::Error;

use crate::channel::ChannelError;

pub type Result<T> = std::result::Result<T, Error>;

/// An error from the hypervisor control channel.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure on the socket.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The hypervisor closed the connection.
    #[error("hypervisor closed the connection")]
    Eof,

    /// The operation did not complete within its deadline.
    #[error("hypervisor reply timed out")]
    Timeout,

    /// The hypervisor sent a line that is not JSON.
    #[error("failed to parse hypervisor line: {0}")]
    Parse(#[from] serde_json::Error),

    /// The command was accepted on the wire but the hypervisor replied with
    /// an error object.
    #[error("qmp command returned error: {command} {line}")]
    Qmp { command: String, line: String },

    /// A blocking call was aborted because a critical event was queued
    /// while waiting. Never surfaced to operators; the caller re-examines
    /// the event queue.
    #[error("interrupted by a pending critical event")]
    Interrupt,

    /// The channel failed earlier and the sticky error latch is set.
    #[error("hypervisor channel failed: {0}")]
    Failed(String),
}

impl From<ChannelError> for Error {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Eof => Error::Eof,
            ChannelError::Timeout => Error::Timeout,
            ChannelError::Io(err) => Error::Io(err),
        }
    }
}

impl Error {
    /// Whether this failure latches the sticky error: any transport or
    /// protocol breakage, but not command-level errors or interrupts.
    pub(crate) fn is_sticky(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Eof | Error::Timeout | Error::Parse(_)
        )
    }
}
