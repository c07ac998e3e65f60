use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

/// Process-wide opaque key/value object for management clients. Replaced
/// wholesale by `set-store`; the daemon itself never looks inside.
#[derive(Debug, Clone, Default)]
pub struct Store {
    inner: Arc<Mutex<Value>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Value {
        let inner = self.inner.lock().expect("store lock poisoned");
        if inner.is_null() {
            json!({})
        } else {
            inner.clone()
        }
    }

    pub fn replace(&self, value: Value) {
        *self.inner.lock().expect("store lock poisoned") = value;
    }
}
