use std::sync::Mutex;

/// The three configurable hypervisor command sequences, installed through
/// the management protocol and read by the main state machine. Commands are
/// opaque single-line JSON payloads; empty until set.
#[derive(Debug, Default)]
pub struct CommandStore {
    inner: Mutex<Commands>,
}

#[derive(Debug, Default, Clone)]
struct Commands {
    migration: Vec<String>,
    failover_primary: Vec<String>,
    failover_secondary: Vec<String>,
}

impl CommandStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_migration(&self, commands: Vec<String>) {
        self.lock().migration = commands;
    }

    pub fn set_failover_primary(&self, commands: Vec<String>) {
        self.lock().failover_primary = commands;
    }

    pub fn set_failover_secondary(&self, commands: Vec<String>) {
        self.lock().failover_secondary = commands;
    }

    pub fn migration(&self) -> Vec<String> {
        self.lock().migration.clone()
    }

    /// Failover sequence for the given role.
    pub fn failover(&self, primary: bool) -> Vec<String> {
        let inner = self.lock();
        if primary {
            inner.failover_primary.clone()
        } else {
            inner.failover_secondary.clone()
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Commands> {
        self.inner.lock().expect("command store lock poisoned")
    }
}
