//! Latency synchronization
//!
//! Measures round-trip latency to every peer, smooths it per peer and turns
//! it into playback delays that keep everyone's notes in step.

mod policy;
mod synchronizer;
mod tracker;
mod window;

pub use policy::{compute_delay, shared_baseline, DelayPolicy};
pub use synchronizer::{
    LatencySnapshot, LatencySynchronizer, PeerSnapshot, SyncError, SyncStatus,
};
pub use tracker::PeerLatencyTracker;
pub use window::RollingWindow;
