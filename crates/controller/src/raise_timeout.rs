use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use colod_qmp::Qmp;

/// Widens the hypervisor deadline across the stop/resume pair of a
/// checkpoint swap. Single instance: starting while one is live is a
/// no-op; every exit path restores the low deadline.
pub struct RaiseTimeout {
    qmp: Arc<Qmp>,
    timeout_low: u64,
    timeout_high: u64,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl RaiseTimeout {
    pub fn new(qmp: Arc<Qmp>, timeout_low: u64, timeout_high: u64) -> Self {
        Self {
            qmp,
            timeout_low,
            timeout_high,
            task: Mutex::new(None),
        }
    }

    /// The baseline deadline restored after the swap.
    pub fn timeout_low(&self) -> u64 {
        self.timeout_low
    }

    /// Raise the deadline and watch for STOP then RESUME.
    pub fn spawn(self: &Arc<Self>) {
        let mut task = self.task.lock().expect("raise timeout lock poisoned");
        if let Some((_, handle)) = task.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }

        trace!("raising qmp timeout");
        self.qmp.set_timeout(self.timeout_high);

        let this = Arc::clone(self);
        let cancel = CancellationToken::new();
        let watch = cancel.clone();
        let handle = tokio::spawn(async move {
            let swap = async {
                if this.qmp.wait_event(&json!({"event": "STOP"}), 0).await.is_err() {
                    return;
                }
                let _ = this.qmp.wait_event(&json!({"event": "RESUME"}), 0).await;
            };

            tokio::select! {
                _ = swap => {}
                _ = watch.cancelled() => {}
            }

            trace!("restoring qmp timeout");
            this.qmp.set_timeout(this.timeout_low);
        });

        *task = Some((cancel, handle));
    }

    /// Cancel a live helper, restoring the low deadline.
    pub async fn shutdown(&self) {
        let task = self
            .task
            .lock()
            .expect("raise timeout lock poisoned")
            .take();
        if let Some((cancel, handle)) = task {
            cancel.cancel();
            let _ = handle.await;
        }
    }
}
