use thiserror::Error;

/// Controller-level failures around the hypervisor channel.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Qmp(#[from] colod_qmp::Error),

    /// query-status / query-colo-status came back without the expected
    /// members.
    #[error("failed to parse query-status and query-colo-status output")]
    StatusParse,

    /// The hypervisor reports a combination this daemon does not know.
    #[error("unknown qemu status: {status}, {colo}")]
    UnknownStatus { status: String, colo: String },

    /// Observed hypervisor role differs from the cached belief.
    #[error(
        "qemu status mismatch: ({observed_primary}, {observed_replication}) \
         expected: ({expected_primary}, {expected_replication})"
    )]
    StatusMismatch {
        observed_primary: bool,
        observed_replication: bool,
        expected_primary: bool,
        expected_replication: bool,
    },
}

impl Error {
    /// A command-level error reply, as opposed to a broken channel.
    pub fn is_qmp_command(&self) -> bool {
        matches!(self, Error::Qmp(colod_qmp::Error::Qmp { .. }))
    }

    /// A wait aborted because the queue went critical.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Error::Qmp(colod_qmp::Error::Interrupt))
    }
}
