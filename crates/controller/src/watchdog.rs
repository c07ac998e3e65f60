use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

use colod_qmp::{EventSubscription, Qmp};

use crate::{health, EventQueue, SharedStatus};

/// Periodic hypervisor health check. Any inbound hypervisor event or
/// explicit refresh resets the timer, so only a quiet channel triggers a
/// check. With an interval of zero the watchdog is inert.
pub struct Watchdog {
    interval: Duration,
    qmp: Arc<Qmp>,
    status: Arc<SharedStatus>,
    queue: Arc<EventQueue>,
    events: EventSubscription,
    refresh: flume::Receiver<()>,
    // Keeps the refresh channel open even when every handle is dropped.
    _keepalive: flume::Sender<()>,
}

/// Resets the watchdog timer; cheap to clone. A handle from an inert
/// watchdog does nothing.
#[derive(Clone)]
pub struct WatchdogHandle {
    refresh: Option<flume::Sender<()>>,
}

impl WatchdogHandle {
    /// Handle that never refreshes anything; for tests and the inert case.
    pub fn inert() -> Self {
        Self { refresh: None }
    }

    pub fn refresh(&self) {
        if let Some(refresh) = &self.refresh {
            let _ = refresh.try_send(());
        }
    }
}

impl Watchdog {
    /// Returns the service (None when `interval_ms` is zero) and the
    /// refresh handle for the execute wrappers.
    pub fn new(
        interval_ms: u64,
        qmp: Arc<Qmp>,
        status: Arc<SharedStatus>,
        queue: Arc<EventQueue>,
    ) -> (Option<Self>, WatchdogHandle) {
        if interval_ms == 0 {
            return (None, WatchdogHandle::inert());
        }

        let (refresh_tx, refresh_rx) = flume::bounded(1);
        let events = qmp.subscribe_event();
        let watchdog = Self {
            interval: Duration::from_millis(interval_ms),
            qmp,
            status,
            queue,
            events,
            refresh: refresh_rx,
            _keepalive: refresh_tx.clone(),
        };
        (
            Some(watchdog),
            WatchdogHandle {
                refresh: Some(refresh_tx),
            },
        )
    }

    pub async fn run(self, cancellation: CancellationToken) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    trace!("watchdog fired");
                    if let Err(err) =
                        health::check_health(&self.qmp, &self.status, &self.queue).await
                    {
                        // qemu died; the event queue already knows.
                        error!("watchdog health check failed: {err}");
                    }
                }
                event = self.events.recv_async() => {
                    if event.is_err() {
                        // Hypervisor channel is gone; nothing left to watch.
                        return;
                    }
                }
                _ = self.refresh.recv_async() => {}
                _ = cancellation.cancelled() => {
                    trace!("cancellation received, stopping watchdog");
                    return;
                }
            }
        }
    }
}
