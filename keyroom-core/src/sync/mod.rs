//! Sync Protocol
//!
//! Wire messages exchanged between peers for latency measurement.

mod protocol;

pub use protocol::*;
