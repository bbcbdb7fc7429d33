//! Peer Networking
//!
//! The transport seam the latency subsystem talks through, plus an
//! in-process implementation for tests and simulation.

mod memory;
mod transport;

pub use memory::{LinkProfile, MemoryEndpoint, MemoryNetwork, NetworkStats};
pub use transport::{HandlerRegistry, MessageHandler, PeerTransport, SubscriptionId, TransportError};
