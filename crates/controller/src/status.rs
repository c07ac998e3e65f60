use std::sync::atomic::{AtomicBool, Ordering};

use colod_types::Status;

/// Flags of the main state machine, shared with the watchdog and the
/// management workers. Only the machine writes `primary`, `replication`,
/// `failed` and `transitioning`; event producers set the peer and quit
/// flags.
#[derive(Debug, Default)]
pub struct SharedStatus {
    primary: AtomicBool,
    replication: AtomicBool,
    failed: AtomicBool,
    peer_failover: AtomicBool,
    peer_failed: AtomicBool,
    transitioning: AtomicBool,
    pending_action: AtomicBool,
    qemu_quit: AtomicBool,
}

macro_rules! flag {
    ($get:ident, $set:ident) => {
        pub fn $get(&self) -> bool {
            self.$get.load(Ordering::Relaxed)
        }

        pub fn $set(&self, value: bool) {
            self.$get.store(value, Ordering::Relaxed);
        }
    };
}

impl SharedStatus {
    pub fn new(primary: bool) -> Self {
        let status = Self::default();
        status.set_primary(primary);
        status
    }

    flag!(primary, set_primary);
    flag!(replication, set_replication);
    flag!(failed, set_failed);
    flag!(peer_failover, set_peer_failover);
    flag!(peer_failed, set_peer_failed);
    flag!(transitioning, set_transitioning);
    flag!(pending_action, set_pending_action);
    flag!(qemu_quit, set_qemu_quit);

    /// Snapshot for `query-status`.
    pub fn snapshot(&self) -> Status {
        Status {
            primary: self.primary(),
            replication: self.replication(),
            failed: self.failed(),
            peer_failover: self.peer_failover(),
            peer_failed: self.peer_failed(),
        }
    }
}
