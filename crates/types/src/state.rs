use serde::Serialize;

/// Role of this node in the replication pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Primary,
    Secondary,
}

impl Role {
    pub fn from_primary(primary: bool) -> Self {
        if primary {
            Role::Primary
        } else {
            Role::Secondary
        }
    }
}

/// Snapshot of the main state machine flags, as reported to management
/// clients by `query-status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Status {
    pub primary: bool,
    pub replication: bool,
    pub failed: bool,
    pub peer_failover: bool,
    pub peer_failed: bool,
}

impl Status {
    pub fn role(&self) -> Role {
        Role::from_primary(self.primary)
    }
}
