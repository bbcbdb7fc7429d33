//! Latency synchronizer
//!
//! Pings every reachable peer on a fixed cadence, folds pong round trips into
//! per-peer rolling averages and derives the shared baseline that playback
//! delays are computed against.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use super::policy::DelayPolicy;
use super::tracker::PeerLatencyTracker;
use crate::clock::Clock;
use crate::config::{ConfigError, SyncConfig};
use crate::identity::IdentityProvider;
use crate::network::{MessageHandler, PeerTransport, SubscriptionId};
use crate::sync::{LatencyMessage, MessageKind, Ping, Pong};
use crate::timer::RepeatingTimer;

/// Synchronizer errors. Only lifecycle misuse surfaces here; network
/// conditions never do.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("No tokio runtime available to drive the sampling timer")]
    NoRuntime,
}

/// Lifecycle state of a synchronizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncStatus {
    /// Not started yet, or the local user id is not resolved so pings and
    /// pongs are skipped
    Uninitialized,
    /// Sampling timer running and local user id known
    Running,
    /// Shut down; the timer is cancelled and handlers are removed
    Stopped,
}

/// Point-in-time view of one tracked peer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerSnapshot {
    pub peer_id: String,
    pub average_ms: f64,
    pub delay_ms: f64,
    pub sample_count: u64,
    pub awaiting_pong: bool,
    /// Average is above the outlier cutoff, so it is ignored by the baseline
    pub excluded: bool,
}

/// Point-in-time view of the whole synchronizer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencySnapshot {
    pub self_id: Option<String>,
    pub status: SyncStatus,
    pub baseline_ms: f64,
    /// Sorted by peer id
    pub peers: Vec<PeerSnapshot>,
}

#[derive(Default)]
struct SyncState {
    peers: HashMap<String, PeerLatencyTracker>,
    baseline_ms: f64,
    self_id: Option<String>,
}

struct Inner {
    config: SyncConfig,
    policy: DelayPolicy,
    transport: Arc<dyn PeerTransport>,
    identity: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    state: RwLock<SyncState>,
    timer: Mutex<Option<RepeatingTimer>>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    stopped: AtomicBool,
}

/// Per-session latency synchronizer.
///
/// Create one per room, [`start`](Self::start) it inside a tokio runtime and
/// query [`delay_ms`](Self::delay_ms) from the audio path. Dropping it shuts
/// it down.
pub struct LatencySynchronizer {
    inner: Arc<Inner>,
}

impl LatencySynchronizer {
    pub fn new(
        config: SyncConfig,
        transport: Arc<dyn PeerTransport>,
        identity: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SyncError> {
        config.validate()?;

        Ok(Self {
            inner: Arc::new(Inner {
                policy: DelayPolicy::from_config(&config),
                config,
                transport,
                identity,
                clock,
                state: RwLock::new(SyncState::default()),
                timer: Mutex::new(None),
                subscriptions: Mutex::new(Vec::new()),
                stopped: AtomicBool::new(false),
            }),
        })
    }

    /// Subscribe to ping/pong messages and start the sampling timer on the
    /// current tokio runtime. Calling it again while running is a no-op.
    pub fn start(&self) -> Result<(), SyncError> {
        let runtime = Handle::try_current().map_err(|_| SyncError::NoRuntime)?;
        self.start_on(&runtime);
        Ok(())
    }

    /// Like [`start`](Self::start) with an explicit runtime handle
    pub fn start_on(&self, runtime: &Handle) {
        let inner = &self.inner;
        if inner.stopped.load(Ordering::SeqCst) {
            warn!("Latency synchronizer already shut down, not restarting");
            return;
        }

        let mut timer = inner.timer.lock();
        if timer.as_ref().is_some_and(|t| t.is_running()) {
            return;
        }

        {
            let mut subscriptions = inner.subscriptions.lock();
            if subscriptions.is_empty() {
                for kind in [MessageKind::LatencyPing, MessageKind::LatencyPong] {
                    let handler = message_handler(Arc::downgrade(inner));
                    subscriptions.push(inner.transport.subscribe(kind, handler));
                }
            }
        }

        let weak = Arc::downgrade(inner);
        *timer = Some(RepeatingTimer::spawn(
            runtime,
            inner.config.tick_interval(),
            move || match weak.upgrade() {
                Some(inner) => {
                    inner.tick();
                    ControlFlow::Continue(())
                }
                None => ControlFlow::Break(()),
            },
        ));

        info!(
            "Latency synchronizer started ({:?} tick, window of {} samples)",
            inner.config.tick_interval(),
            inner.config.window_capacity()
        );
    }

    /// Cancel the timer and unsubscribe handlers. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// One sampling round: ping every reachable peer, then recompute the
    /// baseline. Never fails; unreachable peers just miss this round.
    pub fn tick(&self) {
        self.inner.tick();
    }

    /// Dispatch an inbound message from `sender`.
    ///
    /// Messages whose payload claims a different peer id than the transport
    /// reported are dropped.
    pub fn handle_message(&self, sender: &str, message: LatencyMessage) {
        self.inner.handle_message(sender, message);
    }

    /// Answer a peer's ping with a pong echoing its timestamp
    pub fn on_ping(&self, ping: Ping) {
        self.inner.on_ping(ping);
    }

    /// Fold a pong into the sender's latency history
    pub fn on_pong(&self, pong: Pong) {
        self.inner.on_pong(pong);
    }

    /// Playback delay in ms for a note from `user_id`. Synchronous and
    /// side-effect free; always >= 0.
    pub fn delay_ms(&self, user_id: &str) -> f64 {
        let inner = &self.inner;
        let is_self = inner.current_self_id().is_some_and(|id| id == user_id);

        let state = inner.state.read();
        let peer_avg = state
            .peers
            .get(user_id)
            .map(PeerLatencyTracker::current_average)
            .unwrap_or(0.0);
        inner.policy.delay(is_self, peer_avg, state.baseline_ms)
    }

    /// Start tracking a peer on an explicit join notification. Returns false
    /// when it was already tracked.
    pub fn add_peer(&self, peer_id: &str) -> bool {
        let inner = &self.inner;
        let mut state = inner.state.write();
        if state.peers.contains_key(peer_id) {
            return false;
        }
        match inner.new_tracker(peer_id) {
            Some(tracker) => {
                state.peers.insert(peer_id.to_string(), tracker);
                info!("Tracking latency for {}", peer_id);
                true
            }
            None => false,
        }
    }

    /// Forget a peer that left. Returns false when it was not tracked.
    pub fn remove_peer(&self, peer_id: &str) -> bool {
        let removed = self.inner.state.write().peers.remove(peer_id).is_some();
        if removed {
            info!("Stopped tracking latency for {}", peer_id);
        }
        removed
    }

    /// Baseline computed on the most recent tick
    pub fn shared_baseline_ms(&self) -> f64 {
        self.inner.state.read().baseline_ms
    }

    /// Rolling one-way latency for a tracked peer
    pub fn peer_average_ms(&self, peer_id: &str) -> Option<f64> {
        self.inner
            .state
            .read()
            .peers
            .get(peer_id)
            .map(PeerLatencyTracker::current_average)
    }

    pub fn tracked_peers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.state.read().peers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn self_id(&self) -> Option<String> {
        self.inner.current_self_id()
    }

    pub fn status(&self) -> SyncStatus {
        self.inner.status()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Current time on the synchronizer's clock, in ms
    pub fn now_ms(&self) -> f64 {
        self.inner.clock.now_ms()
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let inner = &self.inner;
        let self_id = inner.current_self_id();
        let status = inner.status();
        let state = inner.state.read();

        let mut peers: Vec<PeerSnapshot> = state
            .peers
            .values()
            .map(|tracker| {
                let average_ms = tracker.current_average();
                PeerSnapshot {
                    peer_id: tracker.peer_id().to_string(),
                    average_ms,
                    delay_ms: inner.policy.delay(
                        self_id.as_deref() == Some(tracker.peer_id()),
                        average_ms,
                        state.baseline_ms,
                    ),
                    sample_count: tracker.sample_count(),
                    awaiting_pong: tracker.pending_ping_time().is_some(),
                    excluded: inner.policy.is_outlier(average_ms),
                }
            })
            .collect();
        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));

        LatencySnapshot {
            self_id,
            status,
            baseline_ms: state.baseline_ms,
            peers,
        }
    }
}

impl Drop for LatencySynchronizer {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

fn message_handler(inner: Weak<Inner>) -> MessageHandler {
    Arc::new(move |sender: &str, message: LatencyMessage| {
        if let Some(inner) = inner.upgrade() {
            inner.handle_message(sender, message);
        }
    })
}

impl Inner {
    fn tick(&self) {
        let peer_ids = self.transport.active_peer_ids();

        match self.resolve_self_id() {
            Some(self_id) => {
                for peer_id in peer_ids.iter().filter(|id| **id != self_id) {
                    self.ping_peer(peer_id, &self_id);
                }
            }
            None => debug!(
                "Local user id not resolved, skipping pings to {} peers",
                peer_ids.len()
            ),
        }

        self.recompute_baseline();
    }

    fn ping_peer(&self, peer_id: &str, self_id: &str) {
        let now = self.clock.now_ms();
        let ping = LatencyMessage::ping(now, self_id);

        // Send without holding the state lock: a transport may deliver
        // synchronously back into our handlers.
        if let Err(e) = self.transport.send_to_peer(peer_id, &ping) {
            debug!("Skipping latency sample for {}: {}", peer_id, e);
            return;
        }

        let mut state = self.state.write();
        if !state.peers.contains_key(peer_id) {
            let Some(tracker) = self.new_tracker(peer_id) else {
                return;
            };
            info!("Tracking latency for {}", peer_id);
            state.peers.insert(peer_id.to_string(), tracker);
        }
        if let Some(tracker) = state.peers.get_mut(peer_id) {
            tracker.record_ping_sent(now);
        }
    }

    fn recompute_baseline(&self) {
        let mut state = self.state.write();
        let baseline = self
            .policy
            .baseline(state.peers.values().map(PeerLatencyTracker::current_average));
        if baseline != state.baseline_ms {
            debug!("Shared baseline {:.1}ms -> {:.1}ms", state.baseline_ms, baseline);
        }
        state.baseline_ms = baseline;
    }

    fn handle_message(&self, sender: &str, message: LatencyMessage) {
        if message.peer_id() != sender {
            warn!(
                "Dropping {} from {} claiming to be {}",
                message.kind().as_str(),
                sender,
                message.peer_id()
            );
            return;
        }

        match message {
            LatencyMessage::Ping(ping) => self.on_ping(ping),
            LatencyMessage::Pong(pong) => self.on_pong(pong),
        }
    }

    fn on_ping(&self, ping: Ping) {
        let Some(self_id) = self.resolve_self_id() else {
            debug!("Local user id not resolved, not answering ping from {}", ping.peer_id);
            return;
        };

        let pong = LatencyMessage::pong(ping.ping_time, self_id);
        if let Err(e) = self.transport.send_to_peer(&ping.peer_id, &pong) {
            debug!("Could not answer ping from {}: {}", ping.peer_id, e);
        }
    }

    fn on_pong(&self, pong: Pong) {
        let now = self.clock.now_ms();
        let mut state = self.state.write();

        let Some(tracker) = state.peers.get_mut(&pong.peer_id) else {
            debug!("Dropping pong from untracked peer {}", pong.peer_id);
            return;
        };

        match tracker.record_echo(pong.ping_time, now) {
            Some(latency) => debug!(
                "Latency to {}: sample={:.1}ms, avg={:.1}ms",
                pong.peer_id,
                latency,
                tracker.current_average()
            ),
            None => debug!(
                "Ignoring duplicate or unmatched pong from {} (pingTime={})",
                pong.peer_id, pong.ping_time
            ),
        }
    }

    fn new_tracker(&self, peer_id: &str) -> Option<PeerLatencyTracker> {
        match PeerLatencyTracker::new(peer_id, self.config.window_capacity()) {
            Ok(tracker) => Some(tracker),
            Err(e) => {
                warn!("Cannot track {}: {}", peer_id, e);
                None
            }
        }
    }

    /// Cached id, or ask the identity provider and cache the answer
    fn resolve_self_id(&self) -> Option<String> {
        if let Some(id) = self.state.read().self_id.clone() {
            return Some(id);
        }

        let id = self.identity.my_user_id()?;
        let mut state = self.state.write();
        if state.self_id.is_none() {
            info!("Local user id resolved: {}", id);
            state.self_id = Some(id.clone());
        }
        Some(id)
    }

    /// Like [`resolve_self_id`](Self::resolve_self_id) but never writes
    fn current_self_id(&self) -> Option<String> {
        self.state
            .read()
            .self_id
            .clone()
            .or_else(|| self.identity.my_user_id())
    }

    fn status(&self) -> SyncStatus {
        if self.stopped.load(Ordering::SeqCst) {
            SyncStatus::Stopped
        } else if self.timer_running() && self.current_self_id().is_some() {
            SyncStatus::Running
        } else {
            SyncStatus::Uninitialized
        }
    }

    fn timer_running(&self) -> bool {
        self.timer.lock().as_ref().is_some_and(RepeatingTimer::is_running)
    }

    fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(mut timer) = self.timer.lock().take() {
            timer.stop();
        }
        for id in self.subscriptions.lock().drain(..) {
            self.transport.unsubscribe(id);
        }
        info!("Latency synchronizer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, MonotonicClock};
    use crate::identity::{DeferredIdentity, StaticIdentity};
    use crate::network::{HandlerRegistry, LinkProfile, MemoryNetwork, TransportError};
    use std::collections::HashSet;
    use std::time::Duration;

    /// Transport that records sends instead of delivering them
    #[derive(Default)]
    struct RecordingTransport {
        peers: Mutex<Vec<String>>,
        unreachable: Mutex<HashSet<String>>,
        sent: Mutex<Vec<(String, LatencyMessage)>>,
        registry: HandlerRegistry,
    }

    impl RecordingTransport {
        fn with_peers(peers: &[&str]) -> Arc<Self> {
            let transport = Self::default();
            *transport.peers.lock() = peers.iter().map(|p| p.to_string()).collect();
            Arc::new(transport)
        }

        fn take_sent(&self) -> Vec<(String, LatencyMessage)> {
            std::mem::take(&mut *self.sent.lock())
        }
    }

    impl PeerTransport for RecordingTransport {
        fn send_to_peer(&self, peer_id: &str, message: &LatencyMessage) -> Result<(), TransportError> {
            if self.unreachable.lock().contains(peer_id) {
                return Err(TransportError::PeerUnreachable(peer_id.to_string()));
            }
            self.sent.lock().push((peer_id.to_string(), message.clone()));
            Ok(())
        }

        fn subscribe(&self, kind: MessageKind, handler: MessageHandler) -> SubscriptionId {
            self.registry.subscribe(kind, handler)
        }

        fn unsubscribe(&self, id: SubscriptionId) {
            self.registry.unsubscribe(id);
        }

        fn active_peer_ids(&self) -> Vec<String> {
            self.peers.lock().clone()
        }
    }

    fn config() -> SyncConfig {
        SyncConfig {
            min_latency_cutoff_ms: 10.0,
            ..SyncConfig::default()
        }
    }

    fn synchronizer(
        transport: &Arc<RecordingTransport>,
        clock: &Arc<ManualClock>,
    ) -> LatencySynchronizer {
        LatencySynchronizer::new(
            config(),
            Arc::clone(transport) as Arc<dyn PeerTransport>,
            Arc::new(StaticIdentity::new("me")),
            Arc::clone(clock) as Arc<dyn Clock>,
        )
        .unwrap()
    }

    fn pong(ping_time: f64, peer_id: &str) -> Pong {
        Pong {
            ping_time,
            peer_id: peer_id.to_string(),
        }
    }

    #[test]
    fn test_invalid_config_fails_fast() {
        let transport = RecordingTransport::with_peers(&[]);
        let result = LatencySynchronizer::new(
            SyncConfig {
                samples_per_minute: 0,
                ..SyncConfig::default()
            },
            transport,
            Arc::new(StaticIdentity::new("me")),
            Arc::new(ManualClock::default()),
        );
        assert!(matches!(result, Err(SyncError::Config(ConfigError::InvalidSampleRate))));
    }

    #[test]
    fn test_tick_pings_every_peer() {
        let transport = RecordingTransport::with_peers(&["alice", "bob"]);
        let clock = Arc::new(ManualClock::new(1000.0));
        let sync = synchronizer(&transport, &clock);

        sync.tick();

        let sent = transport.take_sent();
        assert_eq!(
            sent,
            vec![
                ("alice".to_string(), LatencyMessage::ping(1000.0, "me")),
                ("bob".to_string(), LatencyMessage::ping(1000.0, "me")),
            ]
        );
        assert_eq!(sync.tracked_peers(), vec!["alice", "bob"]);
    }

    #[test]
    fn test_failed_send_creates_no_tracker() {
        let transport = RecordingTransport::with_peers(&["alice", "bob"]);
        transport.unreachable.lock().insert("bob".to_string());
        let clock = Arc::new(ManualClock::new(1000.0));
        let sync = synchronizer(&transport, &clock);

        sync.tick();

        assert_eq!(sync.tracked_peers(), vec!["alice"]);
        // A pong for the ping that never left is ignored
        sync.on_pong(pong(1000.0, "bob"));
        assert_eq!(sync.peer_average_ms("bob"), None);
    }

    #[test]
    fn test_unresolved_identity_skips_pings() {
        let transport = RecordingTransport::with_peers(&["alice"]);
        let identity = Arc::new(DeferredIdentity::new());
        let sync = LatencySynchronizer::new(
            config(),
            Arc::clone(&transport) as Arc<dyn PeerTransport>,
            Arc::clone(&identity) as Arc<dyn IdentityProvider>,
            Arc::new(ManualClock::new(0.0)),
        )
        .unwrap();

        sync.tick();
        assert!(transport.take_sent().is_empty());
        assert!(sync.tracked_peers().is_empty());
        assert_eq!(sync.status(), SyncStatus::Uninitialized);

        identity.resolve("me");
        sync.tick();
        assert_eq!(transport.take_sent().len(), 1);
        assert_eq!(sync.self_id().as_deref(), Some("me"));
    }

    #[test]
    fn test_pong_records_half_round_trip() {
        let transport = RecordingTransport::with_peers(&["alice"]);
        let clock = Arc::new(ManualClock::new(1000.0));
        let sync = synchronizer(&transport, &clock);

        sync.tick();
        clock.set(1050.0);
        sync.on_pong(pong(1000.0, "alice"));

        assert_eq!(sync.peer_average_ms("alice"), Some(25.0));
    }

    #[test]
    fn test_pong_uses_echoed_time() {
        let transport = RecordingTransport::with_peers(&["alice"]);
        let clock = Arc::new(ManualClock::new(1000.0));
        let sync = synchronizer(&transport, &clock);

        sync.tick();
        clock.set(1120.0);
        sync.tick();

        // Reply to the first ping arrives after the second went out
        clock.set(1200.0);
        sync.on_pong(pong(1000.0, "alice"));
        assert_eq!(sync.peer_average_ms("alice"), Some(100.0));
    }

    #[test]
    fn test_pong_from_unknown_peer_dropped() {
        let transport = RecordingTransport::with_peers(&[]);
        let clock = Arc::new(ManualClock::new(1000.0));
        let sync = synchronizer(&transport, &clock);

        sync.on_pong(pong(900.0, "ghost"));
        assert!(sync.tracked_peers().is_empty());
    }

    #[test]
    fn test_ping_answered_with_echo() {
        let transport = RecordingTransport::with_peers(&["alice"]);
        let clock = Arc::new(ManualClock::new(5000.0));
        let sync = synchronizer(&transport, &clock);

        sync.handle_message("alice", LatencyMessage::ping(321.5, "alice"));

        assert_eq!(
            transport.take_sent(),
            vec![("alice".to_string(), LatencyMessage::pong(321.5, "me"))]
        );
    }

    #[test]
    fn test_ping_unanswered_without_identity() {
        let transport = RecordingTransport::with_peers(&["alice"]);
        let sync = LatencySynchronizer::new(
            config(),
            Arc::clone(&transport) as Arc<dyn PeerTransport>,
            Arc::new(DeferredIdentity::new()),
            Arc::new(ManualClock::new(0.0)),
        )
        .unwrap();

        sync.on_ping(Ping {
            ping_time: 10.0,
            peer_id: "alice".to_string(),
        });
        assert!(transport.take_sent().is_empty());
    }

    #[test]
    fn test_ping_to_unreachable_peer_is_absorbed() {
        let transport = RecordingTransport::with_peers(&["alice"]);
        transport.unreachable.lock().insert("alice".to_string());
        let clock = Arc::new(ManualClock::new(0.0));
        let sync = synchronizer(&transport, &clock);

        sync.handle_message("alice", LatencyMessage::ping(10.0, "alice"));
        assert!(transport.take_sent().is_empty());
    }

    #[test]
    fn test_spoofed_sender_dropped() {
        let transport = RecordingTransport::with_peers(&["alice"]);
        let clock = Arc::new(ManualClock::new(0.0));
        let sync = synchronizer(&transport, &clock);

        sync.handle_message("mallory", LatencyMessage::ping(10.0, "alice"));
        assert!(transport.take_sent().is_empty());
    }

    /// Tick once, then deliver pongs after each peer's one-way latency and tick again
    fn settle(sync: &LatencySynchronizer, clock: &ManualClock, latencies: &[(&str, f64)]) {
        let start = clock.now_ms();
        sync.tick();
        let mut ordered = latencies.to_vec();
        ordered.sort_by(|a, b| a.1.total_cmp(&b.1));
        for (peer, one_way) in ordered {
            clock.set(start + one_way * 2.0);
            sync.on_pong(pong(start, peer));
        }
        sync.tick();
    }

    #[test]
    fn test_baseline_excludes_outliers() {
        let transport = RecordingTransport::with_peers(&["a", "b", "c"]);
        let clock = Arc::new(ManualClock::new(0.0));
        let sync = synchronizer(&transport, &clock);

        settle(&sync, &clock, &[("a", 50.0), ("b", 30.0), ("c", 500.0)]);

        assert_eq!(sync.shared_baseline_ms(), 50.0);
        let snapshot = sync.snapshot();
        let excluded: Vec<&str> = snapshot
            .peers
            .iter()
            .filter(|p| p.excluded)
            .map(|p| p.peer_id.as_str())
            .collect();
        assert_eq!(excluded, vec!["c"]);
    }

    #[test]
    fn test_delays() {
        let transport = RecordingTransport::with_peers(&["a", "b", "c"]);
        let clock = Arc::new(ManualClock::new(0.0));
        let sync = synchronizer(&transport, &clock);

        settle(&sync, &clock, &[("a", 50.0), ("b", 30.0), ("c", 45.0)]);

        // Self always waits the full baseline
        assert_eq!(sync.delay_ms("me"), 50.0);
        // Slowest qualifying peer needs no extra delay
        assert_eq!(sync.delay_ms("a"), 0.0);
        assert_eq!(sync.delay_ms("b"), 20.0);
        // 50 - 45 = 5 is below the 10ms floor
        assert_eq!(sync.delay_ms("c"), 0.0);
        // Unknown peers count as zero latency
        assert_eq!(sync.delay_ms("stranger"), 50.0);
    }

    #[test]
    fn test_delay_at_min_cutoff_kept() {
        let transport = RecordingTransport::with_peers(&["a", "b"]);
        let clock = Arc::new(ManualClock::new(0.0));
        let sync = synchronizer(&transport, &clock);

        settle(&sync, &clock, &[("a", 40.0), ("b", 30.0)]);
        assert_eq!(sync.delay_ms("b"), 10.0);
    }

    #[test]
    fn test_remove_peer_idempotent() {
        let transport = RecordingTransport::with_peers(&["a", "b"]);
        let clock = Arc::new(ManualClock::new(0.0));
        let sync = synchronizer(&transport, &clock);
        settle(&sync, &clock, &[("a", 60.0), ("b", 20.0)]);

        transport.peers.lock().retain(|p| p != "a");
        assert!(sync.remove_peer("a"));
        assert!(!sync.remove_peer("a"));
        sync.tick();

        assert_eq!(sync.tracked_peers(), vec!["b"]);
        assert_eq!(sync.shared_baseline_ms(), 20.0);
        // Late pong from the departed peer is ignored
        sync.on_pong(pong(0.0, "a"));
        assert_eq!(sync.peer_average_ms("a"), None);
    }

    #[test]
    fn test_add_peer() {
        let transport = RecordingTransport::with_peers(&[]);
        let clock = Arc::new(ManualClock::new(0.0));
        let sync = synchronizer(&transport, &clock);

        assert!(sync.add_peer("a"));
        assert!(!sync.add_peer("a"));
        assert_eq!(sync.peer_average_ms("a"), Some(0.0));
        // No ping has gone out yet, so pongs are not expected
        sync.on_pong(pong(0.0, "a"));
        assert_eq!(sync.snapshot().peers[0].sample_count, 0);
    }

    #[test]
    fn test_not_running_until_started() {
        let transport = RecordingTransport::with_peers(&["alice"]);
        let clock = Arc::new(ManualClock::new(0.0));
        let sync = synchronizer(&transport, &clock);

        // Identity is known and ticks work, but no timer drives them
        sync.tick();
        assert_eq!(sync.self_id().as_deref(), Some("me"));
        assert_eq!(sync.status(), SyncStatus::Uninitialized);
        assert_eq!(sync.snapshot().status, SyncStatus::Uninitialized);
    }

    #[test]
    fn test_start_outside_runtime() {
        let transport = RecordingTransport::with_peers(&[]);
        let clock = Arc::new(ManualClock::new(0.0));
        let sync = synchronizer(&transport, &clock);
        assert!(matches!(sync.start(), Err(SyncError::NoRuntime)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_shutdown() {
        let transport = RecordingTransport::with_peers(&["alice"]);
        let clock = Arc::new(ManualClock::new(0.0));
        let sync = synchronizer(&transport, &clock);

        assert_eq!(sync.status(), SyncStatus::Uninitialized);
        sync.start().unwrap();
        sync.start().unwrap();
        assert_eq!(transport.registry.len(), 2);
        assert_eq!(sync.status(), SyncStatus::Running);

        // 120ms interval: ticks at 0, 120, 240
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(transport.take_sent().len(), 3);

        sync.shutdown();
        sync.shutdown();
        assert_eq!(sync.status(), SyncStatus::Stopped);
        assert!(transport.registry.is_empty());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(transport.take_sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_timer() {
        let transport = RecordingTransport::with_peers(&["alice"]);
        let clock = Arc::new(ManualClock::new(0.0));
        let sync = synchronizer(&transport, &clock);
        sync.start().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(sync);

        transport.take_sent();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(transport.take_sent().is_empty());
        assert!(transport.registry.is_empty());
    }

    fn room_member(network: &MemoryNetwork, id: &str) -> LatencySynchronizer {
        let sync = LatencySynchronizer::new(
            config(),
            Arc::new(network.connect(id)),
            Arc::new(StaticIdentity::new(id)),
            Arc::new(MonotonicClock::new()),
        )
        .unwrap();
        sync.start().unwrap();
        sync
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1.0,
            "expected ~{}ms, got {}ms",
            expected,
            actual
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_room_over_memory_network() {
        let network = MemoryNetwork::new(LinkProfile::fixed(5.0));
        network.set_link("me", "near", LinkProfile::fixed(30.0));
        network.set_link("me", "far", LinkProfile::fixed(50.0));
        network.set_link("me", "remote", LinkProfile::fixed(400.0));

        let me = room_member(&network, "me");
        let _near = room_member(&network, "near");
        let _far = room_member(&network, "far");
        let _remote = room_member(&network, "remote");

        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_close(me.peer_average_ms("near").unwrap(), 30.0);
        assert_close(me.peer_average_ms("far").unwrap(), 50.0);
        assert_close(me.peer_average_ms("remote").unwrap(), 400.0);

        assert_close(me.shared_baseline_ms(), 50.0);
        assert_close(me.delay_ms("me"), 50.0);
        assert_close(me.delay_ms("near"), 20.0);
        assert_eq!(me.delay_ms("far"), 0.0);
        assert_eq!(me.delay_ms("remote"), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_leaving_mid_session() {
        let network = MemoryNetwork::new(LinkProfile::fixed(5.0));
        network.set_link("me", "far", LinkProfile::fixed(60.0));

        let me = room_member(&network, "me");
        let _near = room_member(&network, "near");
        let far = room_member(&network, "far");

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_close(me.shared_baseline_ms(), 60.0);

        far.shutdown();
        network.disconnect("far");
        me.remove_peer("far");
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(me.tracked_peers(), vec!["near"]);
        assert_close(me.shared_baseline_ms(), 5.0);
    }
}
