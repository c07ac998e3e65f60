use std::sync::Arc;
use std::time::Duration;

use eyre::WrapErr;
use tokio::select;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use colod_client::{ClientContext, Store};
use colod_cluster::Cluster;
use colod_controller::{EventQueue, Machine, RaiseTimeout, SharedStatus, Watchdog};
use colod_qmp::Qmp;
use colod_types::{CommandStore, Event};

use crate::config::DaemonConfig;

/// The limit of time to wait for services to finish on shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Owns the shared state and wires every service together. Construction
/// order follows the dependency chain: hypervisor channels first, then the
/// listener, the watchdog, the state machine and the cluster adapter.
pub struct Daemon {
    config: DaemonConfig,
    queue: Arc<EventQueue>,
    status: Arc<SharedStatus>,
    qmp: Arc<Qmp>,
    commands: Arc<CommandStore>,
    store: Store,
    cancellation: CancellationToken,
    task_tracker: TaskTracker,
}

impl Daemon {
    pub async fn new(config: DaemonConfig) -> eyre::Result<Self> {
        let qmp = Qmp::connect(
            &config.qmp_path,
            config.qmp_yank_path(),
            config.timeout_low,
        )
        .await
        .wrap_err("failed to initialize qmp")?;

        Ok(Self {
            queue: Arc::new(EventQueue::new()),
            status: Arc::new(SharedStatus::new(config.primary)),
            qmp: Arc::new(qmp),
            commands: Arc::new(CommandStore::new()),
            store: Store::new(),
            cancellation: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
            config,
        })
    }

    /// Spawn every service. The state machine cancels the shared token on
    /// exit, which stops the rest.
    pub fn run(&self) -> eyre::Result<()> {
        let raise_timeout = Arc::new(RaiseTimeout::new(
            Arc::clone(&self.qmp),
            self.config.timeout_low,
            self.config.timeout_high,
        ));

        // The agreed-order bus library stays outside this tree; without an
        // endpoint the adapter runs with the bus disabled and a lone node
        // always wins its own election.
        let (cluster, cluster_handle, group_events) = Cluster::disabled();
        info!("group messaging bus not wired, running standalone elections");
        self.task_tracker.spawn(cluster.run(self.cancellation.clone()));

        let (watchdog, watchdog_handle) = Watchdog::new(
            self.config.watchdog_interval,
            Arc::clone(&self.qmp),
            Arc::clone(&self.status),
            Arc::clone(&self.queue),
        );
        if let Some(watchdog) = watchdog {
            self.task_tracker.spawn(watchdog.run(self.cancellation.clone()));
        }

        let machine = Machine::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.status),
            Arc::clone(&self.qmp),
            cluster_handle,
            Arc::clone(&self.commands),
            watchdog_handle.clone(),
            raise_timeout,
        );
        machine.spawn_sources(&self.task_tracker, group_events, &self.cancellation);

        let socket = self.config.base_directory.join("colod.sock");
        let listener = colod_client::bind(&socket)
            .wrap_err_with(|| format!("failed to bind management socket {socket:?}"))?;
        let ctx = ClientContext {
            qmp: Arc::clone(&self.qmp),
            queue: Arc::clone(&self.queue),
            status: Arc::clone(&self.status),
            commands: Arc::clone(&self.commands),
            watchdog: watchdog_handle,
            store: self.store.clone(),
        };
        self.task_tracker
            .spawn(colod_client::run_listener(listener, ctx, self.cancellation.clone()));

        self.task_tracker.spawn(machine.run(self.cancellation.clone()));
        self.task_tracker.close();

        Ok(())
    }

    /// Completes when the state machine has terminated.
    pub async fn finished(&self) {
        self.cancellation.cancelled().await
    }

    /// Ask the state machine to wind down.
    pub fn request_quit(&self) {
        self.queue.push(Event::Quit, "signal");
    }

    pub async fn shutdown(&self) {
        info!("shutting down, waiting for services...");

        let timeout = self
            .config
            .shutdown_timeout
            .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS);

        select! {
            _ = self.task_tracker.wait() => {}
            _ = sleep(Duration::from_secs(timeout)) => {
                info!("shutdown timeout reached, exiting...");
            }
        }
    }
}
