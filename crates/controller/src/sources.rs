//! Event producers: translate hypervisor notifications, channel HUP and
//! cluster deliveries into queued events.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

use colod_cluster::{GroupEvent, Message};
use colod_qmp::{EventSubscription, Response};
use colod_types::Event;

use crate::{EventQueue, RaiseTimeout, SharedStatus};

/// The replicated-disk quorum node; write errors there break replication,
/// anywhere else they only degrade the local node.
const NBD_NODE: &str = "nbd0";

pub(crate) async fn forward_qmp_events(
    events: EventSubscription,
    queue: Arc<EventQueue>,
    raise_timeout: Arc<RaiseTimeout>,
    cancellation: CancellationToken,
) {
    loop {
        tokio::select! {
            event = events.recv_async() => {
                let Ok(event) = event else {
                    return;
                };
                handle_qmp_event(&event, &queue, &raise_timeout);
            }
            _ = cancellation.cancelled() => return,
        }
    }
}

fn handle_qmp_event(event: &Response, queue: &EventQueue, raise_timeout: &Arc<RaiseTimeout>) {
    let Some(name) = event.json.get("event").and_then(Value::as_str) else {
        return;
    };

    match name {
        "QUORUM_REPORT_BAD" => {
            let node = data_str(event, "node-name").unwrap_or_default();
            let kind = data_str(event, "type").unwrap_or_default();
            if node == NBD_NODE {
                if kind != "read" {
                    queue.push(Event::FailoverSync, "nbd write/flush error");
                }
            } else if kind != "read" {
                queue.push(Event::Yellow, "local disk write/flush error");
            }
        }
        "COLO_EXIT" => {
            if data_str(event, "reason") == Some("error") {
                queue.push(Event::FailoverSync, "COLO_EXIT");
            }
        }
        "RESET" => raise_timeout.spawn(),
        _ => trace!(name, "unhandled qmp event"),
    }
}

fn data_str<'e>(event: &'e Response, member: &str) -> Option<&'e str> {
    event
        .json
        .get("data")
        .and_then(|data| data.get(member))
        .and_then(Value::as_str)
}

pub(crate) async fn forward_qmp_hup(
    closed: CancellationToken,
    queue: Arc<EventQueue>,
    status: Arc<SharedStatus>,
    cancellation: CancellationToken,
) {
    tokio::select! {
        _ = closed.cancelled() => {
            error!("qemu quit");
            status.set_qemu_quit(true);
            queue.push(Event::QemuQuit, "qmp hup");
        }
        _ = cancellation.cancelled() => {}
    }
}

pub(crate) async fn forward_group_events(
    events: flume::Receiver<GroupEvent>,
    queue: Arc<EventQueue>,
    status: Arc<SharedStatus>,
    cancellation: CancellationToken,
) {
    loop {
        tokio::select! {
            event = events.recv_async() => {
                let Ok(event) = event else {
                    return;
                };
                handle_group_event(event, &queue, &status);
            }
            _ = cancellation.cancelled() => return,
        }
    }
}

fn handle_group_event(event: GroupEvent, queue: &EventQueue, status: &SharedStatus) {
    match event {
        GroupEvent::PeerLeft => {
            error!("peer failed");
            status.set_peer_failed(true);
            queue.push(Event::PeerFailed, "peer left the group");
        }
        GroupEvent::Delivery {
            from_self,
            message: Message::Failover,
        } => {
            if from_self {
                queue.push(Event::FailoverWin, "got our failover msg");
            } else {
                queue.push(Event::PeerFailover, "got peer failover msg");
            }
        }
        GroupEvent::Delivery {
            from_self,
            message: Message::Failed,
        } => {
            if !from_self {
                error!("peer failed");
                status.set_peer_failed(true);
                queue.push(Event::PeerFailed, "got peer FAILED msg");
            }
        }
    }
}
