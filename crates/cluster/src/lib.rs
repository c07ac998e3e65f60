//! Group-messaging adapter. Joins the instance's broadcast group and
//! translates agreed-order deliveries and membership changes into typed
//! events for the main state machine. The raw bus is abstracted behind
//! [`Transport`]; tests and single-node deployments run with the bus
//! disabled or with the in-memory hub.

mod error;
pub mod mem;
mod message;
mod service;
mod transport;

pub use error::Error;
pub use message::Message;
pub use service::{Cluster, ClusterHandle, GroupEvent};
pub use transport::{NodeId, Transport, TransportEvent};

#[cfg(feature = "mocks")]
pub use transport::MockTransport;
