//! Simulated piano room
//!
//! Runs one latency synchronizer per virtual player over an in-memory network
//! and samples the local player's view into the shared metrics.

use crate::metrics::{LogLevel, Metrics, MonitorStatus};
use keyroom_core::clock::MonotonicClock;
use keyroom_core::identity::StaticIdentity;
use keyroom_core::network::{LinkProfile, MemoryNetwork};
use keyroom_core::{LatencySynchronizer, SyncConfig};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

/// Id of the player whose view is displayed
pub const LOCAL_PLAYER: &str = "you";

/// How often the local snapshot is sampled
const SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Plain mode prints a snapshot every this many samples
const LOG_EVERY_SAMPLES: u64 = 10;

/// The last player leaves after this long, and rejoins after the same again
const CHURN_PERIOD: Duration = Duration::from_secs(20);

/// Link between players neither of whom is local
const DEFAULT_LINK: LinkProfile = LinkProfile {
    latency_ms: 20.0,
    jitter_ms: 4.0,
    loss: 0.0,
};

/// Names and links to the local player, in join order. `dev` sits over the
/// default outlier cutoff.
const REMOTE_PLAYERS: &[(&str, LinkProfile)] = &[
    ("ada", LinkProfile { latency_ms: 12.0, jitter_ms: 3.0, loss: 0.0 }),
    ("dev", LinkProfile { latency_ms: 180.0, jitter_ms: 20.0, loss: 0.05 }),
    ("ben", LinkProfile { latency_ms: 35.0, jitter_ms: 8.0, loss: 0.02 }),
    ("cleo", LinkProfile { latency_ms: 60.0, jitter_ms: 10.0, loss: 0.05 }),
    ("eve", LinkProfile { latency_ms: 25.0, jitter_ms: 2.0, loss: 0.0 }),
    ("finn", LinkProfile { latency_ms: 48.0, jitter_ms: 15.0, loss: 0.1 }),
    ("gus", LinkProfile { latency_ms: 90.0, jitter_ms: 5.0, loss: 0.0 }),
];

/// Largest room the simulation can build, local player included
pub const MAX_PLAYERS: usize = REMOTE_PLAYERS.len() + 1;

/// Events sent from the simulation to the dashboard
#[derive(Debug)]
pub enum SimulationEvent {
    Ready { local_peer: String },
    PeerJoined { peer_id: String },
    PeerLeft { peer_id: String },
}

/// All players in the simulated room
struct Room {
    network: MemoryNetwork,
    config: SyncConfig,
    members: HashMap<String, LatencySynchronizer>,
}

impl Room {
    fn new(config: SyncConfig) -> Self {
        Self {
            network: MemoryNetwork::new(DEFAULT_LINK),
            config,
            members: HashMap::new(),
        }
    }

    fn join(&mut self, peer_id: &str) -> Result<(), Box<dyn Error>> {
        let sync = LatencySynchronizer::new(
            self.config.clone(),
            Arc::new(self.network.connect(peer_id)),
            Arc::new(StaticIdentity::new(peer_id)),
            Arc::new(MonotonicClock::new()),
        )?;
        sync.start()?;
        self.members.insert(peer_id.to_string(), sync);
        Ok(())
    }

    /// Disconnect a player and tell everyone else to forget them
    fn leave(&mut self, peer_id: &str) {
        if let Some(sync) = self.members.remove(peer_id) {
            sync.shutdown();
        }
        self.network.disconnect(peer_id);
        for sync in self.members.values() {
            sync.remove_peer(peer_id);
        }
    }

    fn local(&self) -> Option<&LatencySynchronizer> {
        self.members.get(LOCAL_PLAYER)
    }
}

/// Run the simulation, reporting to the dashboard over `event_tx`
pub async fn run_with_dashboard(
    metrics: Arc<RwLock<Metrics>>,
    players: usize,
    event_tx: mpsc::UnboundedSender<SimulationEvent>,
) -> Result<(), Box<dyn Error>> {
    run(metrics, players, Some(event_tx)).await
}

/// Run the simulation with plain tracing output until Ctrl-C
pub async fn run_with_logging(
    metrics: Arc<RwLock<Metrics>>,
    players: usize,
) -> Result<(), Box<dyn Error>> {
    tokio::select! {
        result = run(metrics, players, None) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            Ok(())
        }
    }
}

async fn run(
    metrics: Arc<RwLock<Metrics>>,
    players: usize,
    event_tx: Option<mpsc::UnboundedSender<SimulationEvent>>,
) -> Result<(), Box<dyn Error>> {
    let config = metrics.read().config.clone();
    let remotes: Vec<(&str, LinkProfile)> = REMOTE_PLAYERS
        .iter()
        .take(players.clamp(2, MAX_PLAYERS) - 1)
        .copied()
        .collect();

    let mut room = Room::new(config);
    for (peer_id, link) in &remotes {
        room.network.set_link(LOCAL_PLAYER, peer_id, *link);
    }

    room.join(LOCAL_PLAYER)?;
    for (peer_id, _) in &remotes {
        room.join(peer_id)?;
    }

    {
        let mut m = metrics.write();
        m.local_peer = Some(LOCAL_PLAYER.to_string());
        m.status = MonitorStatus::Running;
        m.log(
            LogLevel::Info,
            format!("Room started with {} players", remotes.len() + 1),
        );
        for (peer_id, _) in &remotes {
            m.peer_joined(peer_id);
        }
    }
    info!("Simulated room started with {} players", remotes.len() + 1);
    notify(&event_tx, SimulationEvent::Ready {
        local_peer: LOCAL_PLAYER.to_string(),
    });

    // Last remote player drops in and out to exercise churn
    let churner = remotes.last().map(|(peer_id, _)| peer_id.to_string());
    let mut churn = tokio::time::interval_at(tokio::time::Instant::now() + CHURN_PERIOD, CHURN_PERIOD);
    let mut sample = tokio::time::interval(SAMPLE_INTERVAL);

    loop {
        tokio::select! {
            _ = sample.tick() => {
                let Some(local) = room.local() else { continue };
                let snapshot = local.snapshot();

                let mut m = metrics.write();
                if event_tx.is_none() && m.samples_taken % LOG_EVERY_SAMPLES == 0 {
                    let json = serde_json::to_string(&snapshot)?;
                    info!("Snapshot: {}", json);
                }
                m.record_snapshot(snapshot);
            }
            _ = churn.tick() => {
                let Some(peer_id) = churner.as_deref() else { continue };
                if room.members.contains_key(peer_id) {
                    room.leave(peer_id);
                    metrics.write().peer_left(peer_id);
                    info!("{} left the room", peer_id);
                    notify(&event_tx, SimulationEvent::PeerLeft { peer_id: peer_id.to_string() });
                } else {
                    room.join(peer_id)?;
                    metrics.write().peer_joined(peer_id);
                    info!("{} rejoined the room", peer_id);
                    notify(&event_tx, SimulationEvent::PeerJoined { peer_id: peer_id.to_string() });
                }
            }
        }
    }
}

fn notify(event_tx: &Option<mpsc::UnboundedSender<SimulationEvent>>, event: SimulationEvent) {
    if let Some(tx) = event_tx {
        let _ = tx.send(event);
    }
}
