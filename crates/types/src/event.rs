use core::fmt;

/// Events consumed by the main state machine. Producers are the hypervisor
/// channel, the cluster bus, the management clients and the watchdog; the
/// machine is the single consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Placeholder; never queued.
    None,
    /// The local hypervisor is unusable (channel error, health mismatch).
    Failed,
    /// The hypervisor process went away (channel HUP).
    QemuQuit,
    /// The peer broadcast `FAILOVER` and won the election.
    PeerFailover,
    /// Local replication broke; an election must decide the survivor.
    FailoverSync,
    /// The peer is gone (left the group or broadcast `FAILED`).
    PeerFailed,
    /// Our own `FAILOVER` broadcast came back first: we won.
    FailoverWin,
    /// Terminate the daemon.
    Quit,
    /// Terminate once the hypervisor is gone.
    Autoquit,
    /// Degraded but running (local disk error).
    Yellow,
    /// Client asked to start the migration protocol.
    StartMigration,
    /// A failover completed while a migration was in flight.
    DidFailover,
}

impl Event {
    /// Critical events preempt waits and drain before normal events.
    pub fn is_critical(self) -> bool {
        !matches!(
            self,
            Event::None
                | Event::FailoverWin
                | Event::Yellow
                | Event::StartMigration
                | Event::DidFailover
        )
    }

    /// Events that mean the replication pair is broken for good.
    pub fn is_failed(self) -> bool {
        matches!(self, Event::Failed | Event::QemuQuit | Event::PeerFailover)
    }

    /// Events that start the failover path.
    pub fn is_failover_trigger(self) -> bool {
        matches!(self, Event::FailoverSync | Event::PeerFailed)
    }

    /// Whether a generic wait point must act on the event. The two
    /// failover triggers are consumed at dedicated wait points instead.
    pub fn escalates(self) -> bool {
        !self.is_failover_trigger()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Event::None => "NONE",
            Event::Failed => "FAILED",
            Event::QemuQuit => "QEMU_QUIT",
            Event::PeerFailover => "PEER_FAILOVER",
            Event::FailoverSync => "FAILOVER_SYNC",
            Event::PeerFailed => "PEER_FAILED",
            Event::FailoverWin => "FAILOVER_WIN",
            Event::Quit => "QUIT",
            Event::Autoquit => "AUTOQUIT",
            Event::Yellow => "YELLOW",
            Event::StartMigration => "START_MIGRATION",
            Event::DidFailover => "DID_FAILOVER",
        };
        f.write_str(name)
    }
}
