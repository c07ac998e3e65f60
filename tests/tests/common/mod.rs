//! In-process daemon harness: the real services wired together the way the
//! binary does it, against a scripted hypervisor endpoint and with the
//! cluster bus disabled.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use colod_client::{ClientContext, Store};
use colod_cluster::Cluster;
use colod_controller::{EventQueue, Machine, RaiseTimeout, SharedStatus, Watchdog};
use colod_qmp::Qmp;
use colod_types::CommandStore;

pub const TICK: Duration = Duration::from_secs(5);

/// One scripted line channel of the fake hypervisor.
pub struct Channel {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl Channel {
    fn new(stream: UnixStream) -> Self {
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer: write,
        }
    }

    pub async fn send(&mut self, line: &Value) {
        let line = format!("{line}\n");
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    pub async fn recv(&mut self) -> Value {
        let mut line = String::new();
        timeout(TICK, self.reader.read_line(&mut line))
            .await
            .expect("hypervisor expected a command")
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }

    /// Read a line within `window`; None on silence.
    pub async fn try_recv(&mut self, window: Duration) -> Option<Value> {
        let mut line = String::new();
        match timeout(window, self.reader.read_line(&mut line)).await {
            Ok(result) => {
                result.unwrap();
                Some(serde_json::from_str(&line).unwrap())
            }
            Err(_) => None,
        }
    }

    /// Expect `execute` (or `exec-oob`) and reply with the given object.
    pub async fn expect_reply(&mut self, command: &str, reply: &Value) {
        let request = self.recv().await;
        let name = request
            .get("execute")
            .or_else(|| request.get("exec-oob"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        assert_eq!(name, command, "unexpected command: {request}");
        self.send(reply).await;
    }

    pub async fn expect(&mut self, command: &str) {
        self.expect_reply(command, &json!({"return": {}})).await;
    }
}

/// Fake hypervisor: greeted and negotiated on both channels.
pub struct Qemu {
    pub main: Channel,
    pub yank: Channel,
}

/// A management client connected to colod.sock.
pub struct Client {
    inner: BufReader<UnixStream>,
}

impl Client {
    pub async fn request(&mut self, request: &Value) -> Value {
        let line = format!("{request}\n");
        self.inner
            .get_mut()
            .write_all(line.as_bytes())
            .await
            .unwrap();

        let mut reply = String::new();
        timeout(TICK, self.inner.read_line(&mut reply))
            .await
            .expect("management reply expected")
            .unwrap();
        serde_json::from_str(&reply).unwrap()
    }
}

pub struct TestDaemon {
    pub base_dir: PathBuf,
    pub queue: Arc<EventQueue>,
    pub status: Arc<SharedStatus>,
    pub commands: Arc<CommandStore>,
    pub cancellation: CancellationToken,
    tracker: TaskTracker,
}

impl TestDaemon {
    /// The machine cancels this on exit.
    pub async fn finished(&self) {
        timeout(TICK, self.cancellation.cancelled())
            .await
            .expect("daemon should have finished");
    }

    pub async fn teardown(self) {
        self.queue.push(colod_types::Event::Quit, "test teardown");
        self.cancellation.cancel();
        self.tracker.close();
        let _ = timeout(TICK, self.tracker.wait()).await;
        let _ = std::fs::remove_dir_all(&self.base_dir);
    }
}

/// Boot with the cluster bus disabled.
pub async fn boot(primary: bool, watchdog_interval: u64) -> (TestDaemon, Qemu, Client) {
    boot_with(primary, watchdog_interval, None).await
}

/// Boot the whole daemon in-process, optionally joined to an in-memory
/// group. Returns the daemon handles, the scripted hypervisor (handshake
/// already done) and a connected client.
pub async fn boot_with(
    primary: bool,
    watchdog_interval: u64,
    transport: Option<colod_cluster::mem::MemTransport>,
) -> (TestDaemon, Qemu, Client) {
    let base_dir = std::env::temp_dir().join(format!("colod-e2e-{}", fastrand::u64(..)));
    std::fs::create_dir_all(&base_dir).unwrap();

    // Scripted hypervisor endpoint: both channels connect to one socket.
    let qmp_path = base_dir.join("qmp.sock");
    let qmp_listener = UnixListener::bind(&qmp_path).unwrap();

    let greeting = json!({"QMP": {"version": {}, "capabilities": ["oob"]}});
    let server = async {
        let (main, _) = qmp_listener.accept().await.unwrap();
        let (yank, _) = qmp_listener.accept().await.unwrap();
        let mut main = Channel::new(main);
        let mut yank = Channel::new(yank);
        main.send(&greeting).await;
        yank.send(&greeting).await;
        main.expect("qmp_capabilities").await;
        yank.expect("qmp_capabilities").await;
        (main, yank)
    };

    let (qmp, (main, yank)) = tokio::join!(Qmp::connect(&qmp_path, &qmp_path, 1000), server);
    let qmp = Arc::new(qmp.expect("qmp handshake"));

    let queue = Arc::new(EventQueue::new());
    let status = Arc::new(SharedStatus::new(primary));
    let commands = Arc::new(CommandStore::new());
    let store = Store::new();
    let cancellation = CancellationToken::new();
    let tracker = TaskTracker::new();

    let raise_timeout = Arc::new(RaiseTimeout::new(Arc::clone(&qmp), 1000, 10_000));

    let (cluster, cluster_handle, group_events) = match transport {
        Some(transport) => Cluster::new(transport),
        None => Cluster::disabled(),
    };
    tracker.spawn(cluster.run(cancellation.clone()));

    let (watchdog, watchdog_handle) = Watchdog::new(
        watchdog_interval,
        Arc::clone(&qmp),
        Arc::clone(&status),
        Arc::clone(&queue),
    );
    if let Some(watchdog) = watchdog {
        tracker.spawn(watchdog.run(cancellation.clone()));
    }

    let machine = Machine::new(
        Arc::clone(&queue),
        Arc::clone(&status),
        Arc::clone(&qmp),
        cluster_handle,
        Arc::clone(&commands),
        watchdog_handle.clone(),
        raise_timeout,
    );
    machine.spawn_sources(&tracker, group_events, &cancellation);

    let socket = base_dir.join("colod.sock");
    let listener = colod_client::bind(&socket).unwrap();
    let ctx = ClientContext {
        qmp,
        queue: Arc::clone(&queue),
        status: Arc::clone(&status),
        commands: Arc::clone(&commands),
        watchdog: watchdog_handle,
        store,
    };
    tracker.spawn(colod_client::run_listener(listener, ctx, cancellation.clone()));

    tracker.spawn(machine.run(cancellation.clone()));

    let client = UnixStream::connect(&socket).await.unwrap();

    (
        TestDaemon {
            base_dir,
            queue,
            status,
            commands,
            cancellation,
            tracker,
        },
        Qemu { main, yank },
        Client {
            inner: BufReader::new(client),
        },
    )
}
