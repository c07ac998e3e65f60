use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, trace};

use colod_cluster::{ClusterHandle, GroupEvent, Message};
use colod_qmp::json::object_matches;
use colod_qmp::{EventSubscription, Qmp};
use colod_types::{CommandStore, Event};

use crate::{exec, sources, Error, EventQueue, RaiseTimeout, SharedStatus, WatchdogHandle};

const SECONDARY_CAPABILITIES: &str = "{\"execute\":\"migrate-set-capabilities\",\
    \"arguments\":{\"capabilities\":[{\"capability\":\"events\",\"state\":true}]}}";

const MIGRATION_CAPABILITIES: &str = "{\"execute\":\"migrate-set-capabilities\",\
    \"arguments\":{\"capabilities\":[{\"capability\":\"events\",\"state\":true},\
    {\"capability\":\"pause-before-switchover\",\"state\":true}]}}";

const MIGRATE_CONTINUE: &str =
    "{\"execute\":\"migrate-continue\",\"arguments\":{\"state\":\"pre-switchover\"}}";

const MIGRATE_CANCEL: &str = "{\"execute\":\"migrate_cancel\"}";

const STOP: &str = "{\"execute\":\"stop\"}";

/// The switchover point must be reached within five minutes.
const PRE_SWITCHOVER_TIMEOUT_MS: u64 = 5 * 60 * 1000;

/// Entering colo mode after migrate-continue is quick or not at all.
const COLO_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MainState {
    SecondaryStartup,
    SecondaryWait,
    SecondaryColoRunning,
    PrimaryStartup,
    PrimaryWait,
    PrimaryStartMigration,
    PrimaryColoRunning,
    FailoverSync,
    Failover,
    FailedPeerFailover,
    Failed,
    Quit,
    Autoquit,
}

/// Route a critical escalating event from a generic wait point.
fn escalate(event: Event) -> Option<MainState> {
    match event {
        Event::Failed | Event::QemuQuit => Some(MainState::Failed),
        Event::PeerFailover => Some(MainState::FailedPeerFailover),
        Event::Quit => Some(MainState::Quit),
        Event::Autoquit => Some(MainState::Autoquit),
        _ => None,
    }
}

/// Client request to start the migration protocol. Accepted only while no
/// migration is in flight and replication is down; the caller replies
/// success either way.
pub fn request_start_migration(queue: &EventQueue, status: &SharedStatus) -> bool {
    if status.pending_action() || status.replication() {
        return false;
    }
    queue.push(Event::StartMigration, "client request");
    true
}

/// The single consumer of the event queue: drives the hypervisor through
/// the replication life cycle and decides failovers.
pub struct Machine {
    queue: Arc<EventQueue>,
    status: Arc<SharedStatus>,
    qmp: Arc<Qmp>,
    /// Subscribed at construction so no notification between a command
    /// and the following wait can fall through the cracks.
    events: EventSubscription,
    cluster: ClusterHandle,
    commands: Arc<CommandStore>,
    watchdog: WatchdogHandle,
    raise_timeout: Arc<RaiseTimeout>,
}

impl Machine {
    pub fn new(
        queue: Arc<EventQueue>,
        status: Arc<SharedStatus>,
        qmp: Arc<Qmp>,
        cluster: ClusterHandle,
        commands: Arc<CommandStore>,
        watchdog: WatchdogHandle,
        raise_timeout: Arc<RaiseTimeout>,
    ) -> Self {
        let events = qmp.subscribe_event();
        Self {
            queue,
            status,
            qmp,
            events,
            cluster,
            commands,
            watchdog,
            raise_timeout,
        }
    }

    /// Spawn the event producers feeding the queue: hypervisor
    /// notifications, channel HUP and cluster deliveries.
    pub fn spawn_sources(
        &self,
        tracker: &TaskTracker,
        group_events: flume::Receiver<GroupEvent>,
        cancellation: &CancellationToken,
    ) {
        tracker.spawn(sources::forward_qmp_events(
            self.qmp.subscribe_event(),
            Arc::clone(&self.queue),
            Arc::clone(&self.raise_timeout),
            cancellation.clone(),
        ));
        tracker.spawn(sources::forward_qmp_hup(
            self.qmp.closed(),
            Arc::clone(&self.queue),
            Arc::clone(&self.status),
            cancellation.clone(),
        ));
        tracker.spawn(sources::forward_group_events(
            group_events,
            Arc::clone(&self.queue),
            Arc::clone(&self.status),
            cancellation.clone(),
        ));
    }

    /// Run to completion. Cancels `shutdown` on exit so the rest of the
    /// daemon tears down.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut state = if self.status.primary() {
            info!("starting in primary mode");
            MainState::PrimaryStartup
        } else {
            info!("starting in secondary mode");
            MainState::SecondaryStartup
        };

        loop {
            trace!(?state, "entering state");
            state = match state {
                MainState::SecondaryStartup => self.secondary_startup().await,
                MainState::SecondaryWait => self.secondary_wait().await,
                MainState::SecondaryColoRunning | MainState::PrimaryColoRunning => {
                    self.status.set_replication(true);
                    let next = self.colo_running().await;
                    self.status.set_replication(false);
                    next
                }
                MainState::PrimaryStartup => MainState::PrimaryWait,
                MainState::PrimaryWait => {
                    // Running primary standalone now.
                    self.status.set_primary(true);
                    self.status.set_replication(false);
                    self.primary_wait().await
                }
                MainState::PrimaryStartMigration => self.primary_start_migration().await,
                MainState::FailoverSync => self.failover_sync().await,
                MainState::Failover => self.failover().await,
                MainState::FailedPeerFailover => {
                    self.status.set_peer_failover(true);
                    MainState::Failed
                }
                MainState::Failed => match self.failed().await {
                    Some(next) => next,
                    None => break,
                },
                MainState::Autoquit => {
                    self.autoquit().await;
                    break;
                }
                MainState::Quit => break,
            };
        }

        info!("main state machine finished");
        shutdown.cancel();
    }

    async fn execute(&self, command: &str) -> Result<colod_qmp::Response, Error> {
        exec::execute(&self.qmp, &self.queue, &self.watchdog, command).await
    }

    async fn execute_array(&self, commands: &[String], ignore_errors: bool) -> Result<(), Error> {
        exec::execute_array(&self.qmp, &self.queue, &self.watchdog, commands, ignore_errors)
            .await
    }

    /// Next queued event. Hypervisor notifications nobody is waiting for
    /// are drained and dropped along the way.
    async fn next_event(&self) -> Event {
        loop {
            tokio::select! {
                event = self.queue.wait() => return event,
                stale = self.events.recv_async() => {
                    if stale.is_err() {
                        // Reader is gone; the HUP source queues QEMU_QUIT.
                        return self.queue.wait().await;
                    }
                }
            }
        }
    }

    /// Wait for a matching hypervisor event, aborted with
    /// [`colod_qmp::Error::Interrupt`] as soon as a critical event is
    /// queued.
    async fn qmp_event_wait(&self, pattern: &Value, deadline_ms: u64) -> Result<(), Error> {
        let matched = async {
            loop {
                match self.events.recv_async().await {
                    Ok(event) if object_matches(&event.json, pattern) => return Ok(()),
                    Ok(_) => continue,
                    Err(_) => {
                        let message = self
                            .qmp
                            .error()
                            .unwrap_or_else(|| "hypervisor closed the connection".to_owned());
                        return Err(Error::from(colod_qmp::Error::Failed(message)));
                    }
                }
            }
        };

        tokio::select! {
            result = async {
                if deadline_ms == 0 {
                    matched.await
                } else {
                    match tokio::time::timeout(Duration::from_millis(deadline_ms), matched).await {
                        Ok(result) => result,
                        Err(_) => Err(colod_qmp::Error::Timeout.into()),
                    }
                }
            } => result,
            _ = self.queue.critical_arrival() => Err(colod_qmp::Error::Interrupt.into()),
        }
    }

    async fn secondary_startup(&self) -> MainState {
        match self.execute(SECONDARY_CAPABILITIES).await {
            Ok(_) => MainState::SecondaryWait,
            Err(err) => {
                error!("{err}");
                MainState::Failed
            }
        }
    }

    async fn secondary_wait(&self) -> MainState {
        loop {
            match self.qmp_event_wait(&json!({"event": "RESUME"}), 0).await {
                Ok(()) => break,
                Err(_) => {
                    // Interrupted, or the channel broke and queued an
                    // event for us either way.
                    let event = self.next_event().await;
                    if event.is_critical() && event.escalates() {
                        if let Some(next) = escalate(event) {
                            return next;
                        }
                        if event == Event::DidFailover {
                            return MainState::PrimaryWait;
                        }
                    }
                }
            }
        }

        self.raise_timeout.spawn();
        MainState::SecondaryColoRunning
    }

    async fn colo_running(&self) -> MainState {
        loop {
            let event = self.next_event().await;
            match event {
                Event::FailoverSync => return MainState::FailoverSync,
                Event::PeerFailed => return MainState::Failover,
                event if event.is_critical() && event.escalates() => {
                    if let Some(next) = escalate(event) {
                        return next;
                    }
                }
                _ => {}
            }
        }
    }

    async fn primary_wait(&self) -> MainState {
        loop {
            let event = self.next_event().await;
            if event == Event::StartMigration {
                return MainState::PrimaryStartMigration;
            } else if event.is_failed() {
                // A standalone primary tolerates the peer's failover.
                if event != Event::PeerFailover {
                    return MainState::Failed;
                }
            } else if event == Event::Quit {
                return MainState::Quit;
            } else if event == Event::Autoquit {
                return MainState::Autoquit;
            }
        }
    }

    async fn failover_sync(&self) -> MainState {
        self.cluster.send(Message::Failover);

        loop {
            let event = self.next_event().await;
            match event {
                Event::FailoverWin | Event::PeerFailed => return MainState::Failover,
                event if event.is_critical() && event.escalates() => {
                    if let Some(next) = escalate(event) {
                        return next;
                    }
                }
                _ => {}
            }
        }
    }

    async fn failover(&self) -> MainState {
        if let Err(err) = self.qmp.yank().await {
            error!("{err}");
            return MainState::Failed;
        }

        let commands = self.commands.failover(self.status.primary());
        self.status.set_transitioning(true);
        let result = self.execute_array(&commands, true).await;
        self.status.set_transitioning(false);
        if let Err(err) = result {
            error!("{err}");
            return MainState::Failed;
        }

        MainState::PrimaryWait
    }

    async fn primary_start_migration(&self) -> MainState {
        self.status.set_pending_action(true);
        let next = self.run_migration().await;
        self.status.set_pending_action(false);
        next
    }

    async fn run_migration(&self) -> MainState {
        match self.execute(MIGRATION_CAPABILITIES).await {
            Ok(_) => {}
            Err(err) if err.is_qmp_command() => return self.migration_error(err).await,
            Err(err) => return self.qemu_failed(err),
        }
        if self.queue.critical_pending() {
            return self.migration_handle_event().await;
        }

        if let Err(err) = self
            .qmp_event_wait(
                &json!({"event": "MIGRATION", "data": {"status": "pre-switchover"}}),
                PRE_SWITCHOVER_TIMEOUT_MS,
            )
            .await
        {
            return self.migration_error(err).await;
        }

        match self.execute_array(&self.commands.migration(), false).await {
            Ok(()) => {}
            Err(err) if err.is_qmp_command() => return self.migration_error(err).await,
            Err(err) => return self.qemu_failed(err),
        }
        if self.queue.critical_pending() {
            return self.migration_handle_event().await;
        }

        self.raise_timeout.spawn();

        match self.execute(MIGRATE_CONTINUE).await {
            Ok(_) => {}
            Err(err) if err.is_qmp_command() => {
                self.qmp.set_timeout(self.raise_timeout.timeout_low());
                return self.migration_error(err).await;
            }
            Err(err) => {
                self.qmp.set_timeout(self.raise_timeout.timeout_low());
                return self.qemu_failed(err);
            }
        }
        if self.queue.critical_pending() {
            self.qmp.set_timeout(self.raise_timeout.timeout_low());
            return self.migration_handle_event().await;
        }

        self.status.set_transitioning(true);
        let wait = self
            .qmp_event_wait(
                &json!({"event": "MIGRATION", "data": {"status": "colo"}}),
                COLO_TIMEOUT_MS,
            )
            .await;
        self.status.set_transitioning(false);
        if let Err(err) = wait {
            self.qmp.set_timeout(self.raise_timeout.timeout_low());
            return self.migration_error(err).await;
        }

        MainState::PrimaryColoRunning
    }

    fn qemu_failed(&self, err: Error) -> MainState {
        error!("{err}");
        MainState::Failed
    }

    /// Shared error branch of the migration protocol: interrupts consume
    /// the pending event; a command-level error means the pair is out of
    /// sync and we fail over as if the peer were gone; a broken or timed
    /// out channel is fatal.
    async fn migration_error(&self, err: Error) -> MainState {
        if err.is_interrupt() {
            return self.migration_handle_event().await;
        }

        if err.is_qmp_command() {
            error!("{err}");
            return self.migration_failover(Event::PeerFailed).await;
        }

        self.qemu_failed(err)
    }

    async fn migration_handle_event(&self) -> MainState {
        let event = self.next_event().await;
        if event.is_failover_trigger() {
            self.migration_failover(event).await
        } else {
            self.migration_misc_event(event)
        }
    }

    /// Cancel the migration, then run the failover that interrupted it.
    async fn migration_failover(&self, event: Event) -> MainState {
        if let Err(err) = self.execute(MIGRATE_CANCEL).await {
            return self.qemu_failed(err);
        }

        if event == Event::FailoverSync {
            MainState::FailoverSync
        } else {
            MainState::Failover
        }
    }

    fn migration_misc_event(&self, event: Event) -> MainState {
        if event.is_failed() {
            if event == Event::PeerFailover {
                MainState::FailedPeerFailover
            } else {
                MainState::Failed
            }
        } else if event == Event::Quit {
            MainState::Quit
        } else if event == Event::Autoquit {
            MainState::Autoquit
        } else if event == Event::DidFailover {
            MainState::PrimaryWait
        } else {
            MainState::PrimaryColoRunning
        }
    }

    /// Absorbing failure state. Returns the successor state, or None to
    /// terminate the daemon.
    async fn failed(&self) -> Option<MainState> {
        self.status.set_failed(true);
        self.cluster.send(Message::Failed);

        self.qmp.set_timeout(self.raise_timeout.timeout_low());
        if let Some(message) = self.qmp.error() {
            error!("qemu failed: {message}");
        }

        if let Err(err) = self.execute(STOP).await {
            trace!("ignoring stop failure: {err}");
        }

        loop {
            let event = self.next_event().await;
            match event {
                Event::PeerFailover => self.status.set_peer_failover(true),
                Event::Quit => return None,
                Event::Autoquit => {
                    if self.status.qemu_quit() {
                        return None;
                    }
                    return Some(MainState::Autoquit);
                }
                _ => {}
            }
        }
    }

    /// Failed, waiting for the hypervisor to go away before exiting.
    async fn autoquit(&self) {
        self.status.set_failed(true);
        self.cluster.send(Message::Failed);

        loop {
            let event = self.next_event().await;
            match event {
                Event::PeerFailover => self.status.set_peer_failover(true),
                Event::Quit | Event::QemuQuit => return,
                _ => {}
            }
        }
    }
}
