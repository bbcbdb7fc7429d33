//! Note scheduling against measured latency
//!
//! The audio engine plays each note at "now + delay". This module stamps
//! incoming note events with that deadline; rendering them is the engine's job.

use serde::{Deserialize, Serialize};

use crate::latency::LatencySynchronizer;

/// A key press or release from one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteEvent {
    /// Who played the note
    pub user_id: String,
    /// MIDI note number
    pub pitch: u8,
    pub velocity: u8,
    /// True for key down, false for key up
    pub pressed: bool,
}

/// A note with the time it should sound, on the synchronizer's clock
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledNote {
    pub event: NoteEvent,
    pub delay_ms: f64,
    pub play_at_ms: f64,
}

impl LatencySynchronizer {
    /// Stamp a note event with its playback deadline
    pub fn schedule_note(&self, event: NoteEvent) -> ScheduledNote {
        let delay_ms = self.delay_ms(&event.user_id);
        ScheduledNote {
            play_at_ms: self.now_ms() + delay_ms,
            delay_ms,
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::SyncConfig;
    use crate::identity::StaticIdentity;
    use crate::network::{LinkProfile, MemoryNetwork, PeerTransport};
    use crate::sync::Pong;
    use std::sync::Arc;

    fn note(user_id: &str) -> NoteEvent {
        NoteEvent {
            user_id: user_id.to_string(),
            pitch: 60,
            velocity: 100,
            pressed: true,
        }
    }

    #[tokio::test]
    async fn test_schedule_note() {
        let network = MemoryNetwork::new(LinkProfile::fixed(1000.0));
        let _bob = network.connect("bob");
        let clock = Arc::new(ManualClock::new(0.0));
        let sync = LatencySynchronizer::new(
            SyncConfig::default(),
            Arc::new(network.connect("alice")) as Arc<dyn PeerTransport>,
            Arc::new(StaticIdentity::new("alice")),
            Arc::clone(&clock) as Arc<dyn Clock>,
        )
        .unwrap();

        // 80ms round trip to bob -> 40ms one way
        sync.tick();
        clock.set(80.0);
        sync.on_pong(Pong {
            ping_time: 0.0,
            peer_id: "bob".to_string(),
        });
        sync.tick();
        clock.set(1000.0);

        let own = sync.schedule_note(note("alice"));
        assert_eq!(own.delay_ms, 40.0);
        assert_eq!(own.play_at_ms, 1040.0);

        // Bob is the slowest peer, so notes from bob play right away
        let remote = sync.schedule_note(note("bob"));
        assert_eq!(remote.delay_ms, 0.0);
        assert_eq!(remote.play_at_ms, 1000.0);
        assert_eq!(remote.event, note("bob"));
    }

    #[test]
    fn test_note_event_wire_shape() {
        let value = serde_json::to_value(note("carol")).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"userId": "carol", "pitch": 60, "velocity": 100, "pressed": true})
        );
    }
}
