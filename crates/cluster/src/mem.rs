//! In-memory agreed-order bus. One [`MemHub`] per group; every transport
//! joined through it observes all deliveries in the same total order,
//! which is what the failover election relies on.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::{Error, NodeId, Transport, TransportEvent};

const HUB_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
enum HubEvent {
    Delivered { sender: NodeId, payload: Vec<u8> },
    Left { member: NodeId },
}

/// The shared ordering point of a group.
#[derive(Clone)]
pub struct MemHub {
    bus: broadcast::Sender<HubEvent>,
    next_id: Arc<AtomicU32>,
}

impl MemHub {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(HUB_CAPACITY);
        Self {
            bus,
            next_id: Arc::new(AtomicU32::new(1)),
        }
    }

    /// Join the group, receiving every delivery from this point on.
    pub fn join(&self) -> MemTransport {
        MemTransport {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            bus: self.bus.clone(),
            deliveries: self.bus.subscribe(),
        }
    }
}

impl Default for MemHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One member's endpoint on a [`MemHub`]. Dropping it notifies the
/// remaining members that this node left the group.
pub struct MemTransport {
    id: NodeId,
    bus: broadcast::Sender<HubEvent>,
    deliveries: broadcast::Receiver<HubEvent>,
}

impl Drop for MemTransport {
    fn drop(&mut self) {
        let _ = self.bus.send(HubEvent::Left { member: self.id });
    }
}

#[async_trait]
impl Transport for MemTransport {
    fn local_id(&self) -> NodeId {
        self.id
    }

    async fn broadcast(&mut self, payload: &[u8]) -> Result<(), Error> {
        self.bus
            .send(HubEvent::Delivered {
                sender: self.id,
                payload: payload.to_vec(),
            })
            .map_err(|_| Error::Disconnected)?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<TransportEvent, Error> {
        loop {
            match self.deliveries.recv().await {
                Ok(HubEvent::Delivered { sender, payload }) => {
                    return Ok(TransportEvent::Delivered { sender, payload })
                }
                Ok(HubEvent::Left { member }) if member != self.id => {
                    return Ok(TransportEvent::MemberLeft { member })
                }
                Ok(HubEvent::Left { .. }) => continue,
                Err(broadcast::error::RecvError::Lagged(dropped)) => {
                    tracing::warn!("mem transport lagged, dropped {dropped} deliveries");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return Err(Error::Disconnected),
            }
        }
    }
}
