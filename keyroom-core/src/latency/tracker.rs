//! Per-peer latency history

use std::collections::VecDeque;

use super::window::RollingWindow;
use crate::config::ConfigError;

/// Pings remembered while waiting for their pong. Older ones are forgotten
/// and a pong for them is dropped.
const MAX_OUTSTANDING_PINGS: usize = 32;

/// Echoed times within this distance of a sent ping match it (ms)
const ECHO_MATCH_TOLERANCE_MS: f64 = 1e-6;

/// Latency history and in-flight ping state for a single peer.
///
/// Samples are one-way estimates: half of a measured round trip.
#[derive(Debug, Clone)]
pub struct PeerLatencyTracker {
    peer_id: String,
    window: RollingWindow,
    /// Most recent ping not yet acknowledged
    pending_ping_time: Option<f64>,
    /// Send times of pings still waiting for a pong, oldest first
    outstanding: VecDeque<f64>,
    sample_count: u64,
}

impl PeerLatencyTracker {
    pub fn new(peer_id: impl Into<String>, capacity: usize) -> Result<Self, ConfigError> {
        Ok(Self {
            peer_id: peer_id.into(),
            window: RollingWindow::new(capacity)?,
            pending_ping_time: None,
            outstanding: VecDeque::with_capacity(MAX_OUTSTANDING_PINGS),
            sample_count: 0,
        })
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Remember that a ping went out at `now`. An unanswered earlier ping is
    /// simply superseded as the pending one.
    pub fn record_ping_sent(&mut self, now: f64) {
        self.pending_ping_time = Some(now);
        if self.outstanding.len() == MAX_OUTSTANDING_PINGS {
            self.outstanding.pop_front();
        }
        self.outstanding.push_back(now);
    }

    /// Record a pong against the locally stored pending ping.
    ///
    /// Returns the one-way latency sample, or `None` when no ping is pending.
    pub fn record_pong(&mut self, now: f64) -> Option<f64> {
        let ping_time = self.pending_ping_time?;
        let latency = self.accept(ping_time, now)?;
        if let Some(index) = self.outstanding_index(ping_time) {
            self.outstanding.remove(index);
        }
        Some(latency)
    }

    /// Record a pong using the ping time the peer echoed back.
    ///
    /// Every outstanding ping can be answered once, in any order. The pong is
    /// dropped when the echoed time is non-finite or in the future, or when it
    /// matches no outstanding ping: never sent, already answered, or too old
    /// to be remembered.
    pub fn record_echo(&mut self, ping_time: f64, now: f64) -> Option<f64> {
        if !ping_time.is_finite() || ping_time > now {
            return None;
        }
        let index = self.outstanding_index(ping_time)?;
        let latency = self.accept(ping_time, now)?;
        self.outstanding.remove(index);
        Some(latency)
    }

    fn outstanding_index(&self, ping_time: f64) -> Option<usize> {
        self.outstanding
            .iter()
            .position(|sent| (sent - ping_time).abs() <= ECHO_MATCH_TOLERANCE_MS)
    }

    fn accept(&mut self, ping_time: f64, now: f64) -> Option<f64> {
        let latency = (now - ping_time) / 2.0;
        if !latency.is_finite() || latency < 0.0 {
            return None;
        }

        self.window.add(latency);
        self.sample_count += 1;
        if self.pending_ping_time.is_some_and(|pending| pending <= ping_time) {
            self.pending_ping_time = None;
        }
        Some(latency)
    }

    /// Rolling average of one-way latency in ms, 0 before the first sample
    pub fn current_average(&self) -> f64 {
        self.window.average()
    }

    pub fn pending_ping_time(&self) -> Option<f64> {
        self.pending_ping_time
    }

    /// Total samples accepted since the tracker was created
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }
}
