use async_trait::async_trait;

use crate::Error;

/// Node identifier assigned by the bus.
pub type NodeId = u32;

/// Raw happenings on the bus, before translation.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A broadcast reached this node. Deliveries are agreed-order: every
    /// joined node observes every message in the same total order,
    /// including its own.
    Delivered { sender: NodeId, payload: Vec<u8> },
    /// Another member exited the group.
    MemberLeft { member: NodeId },
}

/// The underlying group-messaging bus. The production library lives outside
/// this crate; [`crate::mem::MemTransport`] provides the agreed-order
/// semantics in-process for tests.
#[async_trait]
pub trait Transport: Send + 'static {
    fn local_id(&self) -> NodeId;

    /// Broadcast a frame to the whole group, including ourselves.
    async fn broadcast(&mut self, payload: &[u8]) -> Result<(), Error>;

    /// Next delivery or membership change, in bus order.
    async fn recv(&mut self) -> Result<TransportEvent, Error>;
}

#[cfg(any(test, feature = "mocks"))]
mockall::mock! {
    pub Transport {}

    #[async_trait]
    impl Transport for Transport {
        fn local_id(&self) -> NodeId;
        async fn broadcast(&mut self, payload: &[u8]) -> Result<(), Error>;
        async fn recv(&mut self) -> Result<TransportEvent, Error>;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_mock() {
        let mut _mock = MockTransport::new();
    }
}

