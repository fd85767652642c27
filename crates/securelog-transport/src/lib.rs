//! The Transport (spec.md §4.7): broker capability, fallback file queue,
//! and replay.

pub mod capability;
pub mod fallback;
pub mod transport;

pub use capability::{Broker, BrokerError, NoopBroker};
pub use transport::{ReplayReport, SendOutcome, Transport, TransportError};
