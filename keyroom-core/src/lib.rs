//! Keyroom - Core Library
//!
//! Keeps a collaborative piano room in step: measures latency to every peer,
//! derives a shared baseline and tells the audio path how long to hold each
//! user's notes so they land at every listener together.

pub mod clock;
pub mod config;
pub mod identity;
pub mod latency;
pub mod logging;
pub mod network;
pub mod playback;
pub mod sync;
pub mod timer;

// Re-exports for convenience
pub use config::SyncConfig;
pub use latency::{LatencySnapshot, LatencySynchronizer, SyncError, SyncStatus};
pub use playback::{NoteEvent, ScheduledNote};
pub use sync::LatencyMessage;
