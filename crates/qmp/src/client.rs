use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::net::UnixStream;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::channel::{self, LineReader, LineWriter};
use crate::json::object_matches;
use crate::{Error, Result};

/// Capability negotiation sent on the main channel after the greeting.
const CAPABILITIES: &str = "{\"execute\":\"qmp_capabilities\"}";

/// Capability negotiation for the yank channel; out-of-band commands must
/// be enabled there so the abort can overtake a stuck command.
const CAPABILITIES_OOB: &str =
    "{\"execute\":\"qmp_capabilities\",\"arguments\":{\"enable-oob\":true}}";

/// The out-of-band abort. Aborts stuck migration I/O inside the hypervisor.
const YANK: &str =
    "{\"exec-oob\":\"yank\",\"arguments\":{\"instances\":[{\"type\":\"migration\"}]}}";

/// One parsed line received from the hypervisor.
#[derive(Debug, Clone)]
pub struct Response {
    pub json: Value,
    pub line: String,
}

impl Response {
    pub fn parse(line: String) -> Result<Self> {
        let json = serde_json::from_str(&line)?;
        Ok(Self { json, line })
    }

    /// Command-level error object.
    pub fn has_error(&self) -> bool {
        self.json.get("error").is_some()
    }

    pub fn is_event(&self) -> bool {
        self.json.get("event").is_some()
    }
}

/// Receiver half of an event subscription. Dropping it unsubscribes; the
/// reader prunes disconnected subscribers on the next dispatch.
pub type EventSubscription = flume::Receiver<Arc<Response>>;

/// Sticky error latch shared by the main and yank channels. Set once on the
/// first unrecoverable failure; every later call fails fast.
type StickyError = Arc<Mutex<Option<String>>>;

struct Shared {
    pending: Mutex<Option<oneshot::Sender<Response>>>,
    subscribers: Mutex<Vec<flume::Sender<Arc<Response>>>>,
    sticky: StickyError,
    timeout_ms: AtomicU64,
    closed: CancellationToken,
}

/// Request/response engine over a single line-framed channel. A background
/// reader routes every inbound line: asynchronous events go to subscribers,
/// replies to the single outstanding command waiter, anything else is
/// dropped with a trace.
pub struct QmpClient {
    shared: Arc<Shared>,
    writer: tokio::sync::Mutex<LineWriter>,
}

impl QmpClient {
    pub fn new(stream: UnixStream, timeout_ms: u64, sticky: StickyError) -> Self {
        let (reader, writer) = channel::split(stream);
        let shared = Arc::new(Shared {
            pending: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
            sticky,
            timeout_ms: AtomicU64::new(timeout_ms),
            closed: CancellationToken::new(),
        });

        tokio::spawn(read_loop(reader, Arc::clone(&shared)));

        Self {
            shared,
            writer: tokio::sync::Mutex::new(writer),
        }
    }

    /// Baseline deadline for `execute`.
    pub fn set_timeout(&self, timeout_ms: u64) {
        self.shared.timeout_ms.store(timeout_ms, Ordering::Relaxed);
    }

    pub fn timeout_ms(&self) -> u64 {
        self.shared.timeout_ms.load(Ordering::Relaxed)
    }

    /// The latched cause of the sticky failure, if any.
    pub fn error(&self) -> Option<String> {
        self.shared.sticky.lock().expect("sticky lock poisoned").clone()
    }

    /// Fires when the reader has terminated (HUP, I/O error or garbage on
    /// the wire).
    pub fn closed(&self) -> CancellationToken {
        self.shared.closed.clone()
    }

    /// Register an observer for every inbound asynchronous event.
    pub fn subscribe_event(&self) -> EventSubscription {
        let (tx, rx) = flume::unbounded();
        self.shared
            .subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .push(tx);
        rx
    }

    /// Send one command line and await the matching reply. At most one
    /// command is outstanding per channel; concurrent callers queue on the
    /// writer. Uses the baseline deadline.
    pub async fn execute(&self, command: &str) -> Result<Response> {
        self.execute_with_timeout(command, self.timeout_ms()).await
    }

    /// As [`QmpClient::execute`], with an explicit deadline (0 = none).
    pub async fn execute_with_timeout(
        &self,
        command: &str,
        deadline_ms: u64,
    ) -> Result<Response> {
        self.check_sticky()?;

        let mut writer = self.writer.lock().await;

        let (tx, rx) = oneshot::channel();
        *self.shared.pending.lock().expect("pending lock poisoned") = Some(tx);

        trace!(command, "qmp execute");
        let line = format!("{command}\n");
        if let Err(err) = writer.write_all(&line, deadline_ms).await {
            let err = Error::from(err);
            self.latch(&err);
            self.clear_pending();
            return Err(err);
        }

        let reply = if deadline_ms == 0 {
            rx.await.ok()
        } else {
            match tokio::time::timeout(Duration::from_millis(deadline_ms), rx).await {
                Ok(reply) => reply.ok(),
                Err(_) => {
                    let err = Error::Timeout;
                    self.latch(&err);
                    self.clear_pending();
                    return Err(err);
                }
            }
        };

        // A dropped sender means the reader terminated under us.
        reply.ok_or_else(|| self.sticky_error())
    }

    /// Block until an event object-matching `pattern` arrives, or the
    /// deadline expires (0 = none).
    pub async fn wait_event(&self, pattern: &Value, deadline_ms: u64) -> Result<Arc<Response>> {
        self.check_sticky()?;

        let events = self.subscribe_event();
        let wait = async {
            loop {
                match events.recv_async().await {
                    Ok(event) if object_matches(&event.json, pattern) => return Ok(event),
                    Ok(_) => continue,
                    Err(_) => return Err(self.sticky_error()),
                }
            }
        };

        if deadline_ms == 0 {
            return wait.await;
        }

        match tokio::time::timeout(Duration::from_millis(deadline_ms), wait).await {
            Ok(result) => result,
            Err(_) => {
                let err = Error::Timeout;
                self.latch(&err);
                Err(err)
            }
        }
    }

    fn check_sticky(&self) -> Result<()> {
        match self.error() {
            Some(message) => Err(Error::Failed(message)),
            None => Ok(()),
        }
    }

    fn sticky_error(&self) -> Error {
        match self.error() {
            Some(message) => Error::Failed(message),
            None => Error::Eof,
        }
    }

    fn latch(&self, err: &Error) {
        if !err.is_sticky() {
            return;
        }
        let mut sticky = self.shared.sticky.lock().expect("sticky lock poisoned");
        if sticky.is_none() {
            *sticky = Some(err.to_string());
        }
    }

    fn clear_pending(&self) {
        *self.shared.pending.lock().expect("pending lock poisoned") = None;
    }
}

async fn read_loop(mut reader: LineReader, shared: Arc<Shared>) {
    loop {
        let line = match reader.read_line(0).await {
            Ok(line) => line,
            Err(err) => {
                let err = Error::from(err);
                latch_shared(&shared, &err);
                break;
            }
        };

        let response = match Response::parse(line) {
            Ok(response) => response,
            Err(err) => {
                warn!("garbage on qmp channel: {err}");
                latch_shared(&shared, &err);
                break;
            }
        };

        if response.is_event() {
            trace!(line = %response.line, "qmp event");
            let event = Arc::new(response);
            shared
                .subscribers
                .lock()
                .expect("subscriber lock poisoned")
                .retain(|subscriber| subscriber.send(Arc::clone(&event)).is_ok());
        } else if response.json.get("return").is_some() || response.has_error() {
            let waiter = shared
                .pending
                .lock()
                .expect("pending lock poisoned")
                .take();
            match waiter {
                Some(waiter) => {
                    let _ = waiter.send(response);
                }
                None => trace!(line = %response.line, "dropping unmatched qmp reply"),
            }
        } else {
            // Greeting and other non-protocol lines.
            trace!(line = %response.line, "ignoring qmp line");
        }
    }

    shared.closed.cancel();
}

fn latch_shared(shared: &Shared, err: &Error) {
    if !err.is_sticky() {
        return;
    }
    let mut sticky = shared.sticky.lock().expect("sticky lock poisoned");
    if sticky.is_none() {
        *sticky = Some(err.to_string());
    }
}

/// The daemon's view of the hypervisor: the main command channel plus the
/// yank channel, sharing one sticky error latch.
pub struct Qmp {
    main: QmpClient,
    yank: QmpClient,
    did_yank: AtomicBool,
}

impl Qmp {
    /// Wrap two connected sockets. No handshake is performed; call
    /// [`Qmp::negotiate`] before issuing commands.
    pub fn new(main: UnixStream, yank: UnixStream, timeout_ms: u64) -> Self {
        let sticky: StickyError = Arc::new(Mutex::new(None));
        Self {
            main: QmpClient::new(main, timeout_ms, Arc::clone(&sticky)),
            yank: QmpClient::new(yank, timeout_ms, sticky),
            did_yank: AtomicBool::new(false),
        }
    }

    /// Connect both channels and negotiate capabilities.
    pub async fn connect(
        path: impl AsRef<Path>,
        yank_path: impl AsRef<Path>,
        timeout_ms: u64,
    ) -> Result<Self> {
        let main = UnixStream::connect(path).await?;
        let yank = UnixStream::connect(yank_path).await?;
        let qmp = Self::new(main, yank, timeout_ms);
        qmp.negotiate().await?;
        Ok(qmp)
    }

    /// Consume the greeting and enable capabilities on both channels;
    /// out-of-band execution on the yank channel.
    pub async fn negotiate(&self) -> Result<()> {
        for (client, command) in [(&self.main, CAPABILITIES), (&self.yank, CAPABILITIES_OOB)] {
            let reply = client.execute(command).await?;
            if reply.has_error() {
                return Err(Error::Qmp {
                    command: command.to_owned(),
                    line: reply.line,
                });
            }
        }
        Ok(())
    }

    pub async fn execute(&self, command: &str) -> Result<Response> {
        self.main.execute(command).await
    }

    pub async fn execute_with_timeout(&self, command: &str, deadline_ms: u64) -> Result<Response> {
        self.main.execute_with_timeout(command, deadline_ms).await
    }

    pub async fn wait_event(&self, pattern: &Value, deadline_ms: u64) -> Result<Arc<Response>> {
        self.main.wait_event(pattern, deadline_ms).await
    }

    pub fn subscribe_event(&self) -> EventSubscription {
        self.main.subscribe_event()
    }

    /// Send the out-of-band abort over the yank channel. On success the
    /// did-yank latch is set for the next wrapped execute to consume.
    pub async fn yank(&self) -> Result<()> {
        let reply = self.yank.execute(YANK).await?;
        if reply.has_error() {
            return Err(Error::Qmp {
                command: YANK.to_owned(),
                line: reply.line,
            });
        }
        self.did_yank.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Consume the did-yank latch.
    pub fn take_yank(&self) -> bool {
        self.did_yank.swap(false, Ordering::Relaxed)
    }

    /// Baseline deadline for both channels.
    pub fn set_timeout(&self, timeout_ms: u64) {
        self.main.set_timeout(timeout_ms);
        self.yank.set_timeout(timeout_ms);
    }

    pub fn timeout_ms(&self) -> u64 {
        self.main.timeout_ms()
    }

    pub fn error(&self) -> Option<String> {
        self.main.error()
    }

    /// Fires when the main channel reader terminated (hypervisor HUP).
    pub fn closed(&self) -> CancellationToken {
        self.main.closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn client_pair(timeout_ms: u64) -> (QmpClient, UnixStream) {
        let (local, remote) = UnixStream::pair().unwrap();
        let sticky = Arc::new(Mutex::new(None));
        (QmpClient::new(local, timeout_ms, sticky), remote)
    }

    #[tokio::test]
    async fn execute_roundtrip() {
        let (client, server) = client_pair(1000);
        let (server_read, mut server_write) = server.into_split();
        let mut server_read = BufReader::new(server_read);

        let exec = tokio::spawn(async move {
            client.execute("{\"execute\":\"query-status\"}").await
        });

        let mut request = String::new();
        server_read.read_line(&mut request).await.unwrap();
        assert_eq!(request, "{\"execute\":\"query-status\"}\n");
        server_write
            .write_all(b"{\"return\": {\"status\": \"running\"}}\n")
            .await
            .unwrap();

        let reply = exec.await.unwrap().unwrap();
        assert_eq!(reply.json["return"]["status"], "running");
    }

    #[tokio::test]
    async fn events_are_dispatched_to_subscribers_while_waiting() {
        let (client, server) = client_pair(1000);
        let (_server_read, mut server_write) = server.into_split();

        let subscription = client.subscribe_event();

        server_write
            .write_all(b"{\"event\": \"RESUME\", \"timestamp\": {\"seconds\": 0}}\n")
            .await
            .unwrap();

        let event = subscription.recv_async().await.unwrap();
        assert_eq!(event.json["event"], "RESUME");
    }

    #[tokio::test]
    async fn wait_event_matches_pattern() {
        let (client, server) = client_pair(1000);
        let (_server_read, mut server_write) = server.into_split();

        let wait = tokio::spawn(async move {
            client
                .wait_event(
                    &json!({"event": "MIGRATION", "data": {"status": "colo"}}),
                    1000,
                )
                .await
        });

        server_write
            .write_all(b"{\"event\": \"MIGRATION\", \"data\": {\"status\": \"active\"}}\n")
            .await
            .unwrap();
        server_write
            .write_all(b"{\"event\": \"MIGRATION\", \"data\": {\"status\": \"colo\"}}\n")
            .await
            .unwrap();

        let event = wait.await.unwrap().unwrap();
        assert_eq!(event.json["data"]["status"], "colo");
    }

    #[tokio::test]
    async fn timeout_latches_the_sticky_error() {
        let (client, _server) = client_pair(20);

        let err = client.execute("{\"execute\":\"stop\"}").await.unwrap_err();
        assert!(matches!(err, Error::Timeout));

        // The channel is failed for good now.
        let err = client.execute("{\"execute\":\"stop\"}").await.unwrap_err();
        assert!(matches!(err, Error::Failed(_)));
        assert!(client.error().is_some());
    }

    #[tokio::test]
    async fn hup_cancels_the_closed_token() {
        let (client, server) = client_pair(1000);
        let closed = client.closed();
        drop(server);

        closed.cancelled().await;
        assert!(client.error().is_some());
    }

    #[tokio::test]
    async fn greeting_is_ignored() {
        let (client, server) = client_pair(1000);
        let (server_read, mut server_write) = server.into_split();
        let mut server_read = BufReader::new(server_read);

        server_write
            .write_all(b"{\"QMP\": {\"version\": {}, \"capabilities\": [\"oob\"]}}\n")
            .await
            .unwrap();

        let exec = tokio::spawn(async move {
            client.execute("{\"execute\":\"qmp_capabilities\"}").await
        });

        let mut request = String::new();
        server_read.read_line(&mut request).await.unwrap();
        server_write.write_all(b"{\"return\": {}}\n").await.unwrap();

        assert!(exec.await.unwrap().is_ok());
    }
}
