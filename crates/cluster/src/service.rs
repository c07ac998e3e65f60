use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

use crate::{Message, Transport, TransportEvent};

/// What the adapter reports up to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupEvent {
    /// An agreed-order delivery, flagged when we sent it ourselves.
    Delivery { from_self: bool, message: Message },
    /// Another member exited the group.
    PeerLeft,
}

/// Producer half handed to the state machine for broadcasts.
#[derive(Clone)]
pub struct ClusterHandle {
    commands: flume::Sender<Message>,
}

impl ClusterHandle {
    /// Queue a broadcast. Send failures mean the adapter is gone, which
    /// only happens during teardown; they are not reported back.
    pub fn send(&self, message: Message) {
        let _ = self.commands.send(message);
    }
}

/// The adapter service. Owns the bus endpoint, forwards broadcasts from the
/// handle and translates inbound traffic into [`GroupEvent`]s.
pub struct Cluster {
    transport: Option<Box<dyn Transport>>,
    commands: flume::Receiver<Message>,
    events: flume::Sender<GroupEvent>,
}

impl Cluster {
    /// Adapter over a joined bus endpoint.
    pub fn new(
        transport: impl Transport,
    ) -> (Self, ClusterHandle, flume::Receiver<GroupEvent>) {
        Self::build(Some(Box::new(transport)))
    }

    /// Adapter with the bus switched off: no cluster I/O happens at all
    /// and a `FAILOVER` broadcast is delivered back locally as our own, so
    /// a lone node always wins its election.
    pub fn disabled() -> (Self, ClusterHandle, flume::Receiver<GroupEvent>) {
        Self::build(None)
    }

    fn build(
        transport: Option<Box<dyn Transport>>,
    ) -> (Self, ClusterHandle, flume::Receiver<GroupEvent>) {
        let (commands_tx, commands_rx) = flume::unbounded();
        let (events_tx, events_rx) = flume::unbounded();
        let cluster = Self {
            transport,
            commands: commands_rx,
            events: events_tx,
        };
        (cluster, ClusterHandle { commands: commands_tx }, events_rx)
    }

    pub async fn run(self, cancellation: CancellationToken) {
        let Self {
            transport,
            commands,
            events,
        } = self;

        match transport {
            Some(transport) => run_joined(transport, commands, events, cancellation).await,
            None => run_disabled(commands, events, cancellation).await,
        }
    }
}

async fn run_joined(
    mut transport: Box<dyn Transport>,
    commands: flume::Receiver<Message>,
    events: flume::Sender<GroupEvent>,
    cancellation: CancellationToken,
) {
    let local = transport.local_id();

    loop {
        tokio::select! {
            command = commands.recv_async() => {
                let Ok(message) = command else {
                    trace!("all broadcast handles dropped, stopping cluster adapter");
                    return;
                };
                if let Err(err) = transport.broadcast(&message.to_wire()).await {
                    error!("failed to broadcast {message}: {err}");
                }
            }
            inbound = transport.recv() => {
                match inbound {
                    Ok(TransportEvent::Delivered { sender, payload }) => {
                        match Message::from_wire(&payload) {
                            Ok(message) => {
                                let _ = events.send(GroupEvent::Delivery {
                                    from_self: sender == local,
                                    message,
                                });
                            }
                            Err(err) => error!("{err}"),
                        }
                    }
                    Ok(TransportEvent::MemberLeft { member }) => {
                        trace!(member, "group member left");
                        let _ = events.send(GroupEvent::PeerLeft);
                    }
                    Err(err) => {
                        error!("group messaging bus failed: {err}");
                        return;
                    }
                }
            }
            _ = cancellation.cancelled() => {
                trace!("cancellation received, stopping cluster adapter");
                return;
            }
        }
    }
}

async fn run_disabled(
    commands: flume::Receiver<Message>,
    events: flume::Sender<GroupEvent>,
    cancellation: CancellationToken,
) {
    loop {
        tokio::select! {
            command = commands.recv_async() => {
                match command {
                    Ok(Message::Failover) => {
                        let _ = events.send(GroupEvent::Delivery {
                            from_self: true,
                            message: Message::Failover,
                        });
                    }
                    Ok(Message::Failed) => {}
                    Err(_) => return,
                }
            }
            _ = cancellation.cancelled() => return,
        }
    }
}
