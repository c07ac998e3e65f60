//! Management socket of the daemon: one JSON object per line each way.
//! Requests carrying `exec-colod` are daemon-local commands; anything else
//! is forwarded verbatim to the hypervisor.

mod store;
mod worker;

use std::io;
use std::path::Path;
use std::sync::Arc;

use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, trace};

use colod_controller::{EventQueue, SharedStatus, WatchdogHandle};
use colod_qmp::Qmp;
use colod_types::CommandStore;

pub use store::Store;

/// Shared daemon handles each connection worker dispatches into.
#[derive(Clone)]
pub struct ClientContext {
    pub qmp: Arc<Qmp>,
    pub queue: Arc<EventQueue>,
    pub status: Arc<SharedStatus>,
    pub commands: Arc<CommandStore>,
    pub watchdog: WatchdogHandle,
    pub store: Store,
}

/// Bind the management socket, replacing a stale one. Backlog of 2: the
/// only expected clients are the local tooling and an operator shell.
pub fn bind(path: &Path) -> io::Result<UnixListener> {
    let _ = std::fs::remove_file(path);

    let socket = socket2::Socket::new(socket2::Domain::UNIX, socket2::Type::STREAM, None)?;
    socket.bind(&socket2::SockAddr::unix(path)?)?;
    socket.listen(2)?;
    socket.set_nonblocking(true)?;

    UnixListener::from_std(socket.into())
}

/// Accept loop. Each accepted connection runs as an independent worker;
/// cancellation half-closes idle workers and waits for the busy ones.
pub async fn run_listener(
    listener: UnixListener,
    ctx: ClientContext,
    cancellation: CancellationToken,
) {
    let workers = TaskTracker::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        trace!("new management client");
                        workers.spawn(worker::run(stream, ctx.clone(), cancellation.clone()));
                    }
                    Err(err) => {
                        error!("failed to accept new client: {err}");
                        break;
                    }
                }
            }
            _ = cancellation.cancelled() => break,
        }
    }

    workers.close();
    workers.wait().await;
}
