//! Metrics tracking for the room monitor

use chrono::{DateTime, Local};
use keyroom_core::{LatencySnapshot, SyncConfig};
use std::collections::{HashSet, VecDeque};

/// Maximum number of log entries to keep
const MAX_LOG_ENTRIES: usize = 100;

/// Baseline moves smaller than this are not worth a log line (ms)
const BASELINE_LOG_THRESHOLD_MS: f64 = 5.0;

/// A log entry for the dashboard
#[derive(Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum LogLevel {
    Info,
    Warning,
    Presence,
    Latency,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARN",
            LogLevel::Presence => "ROOM",
            LogLevel::Latency => "SYNC",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum MonitorStatus {
    Starting,
    Running,
}

/// Room metrics as seen from the local player
pub struct Metrics {
    /// Monitor start time
    pub start_time: DateTime<Local>,

    /// Local player's id
    pub local_peer: Option<String>,

    /// Synchronizer settings in effect
    pub config: SyncConfig,

    /// Latest snapshot of the local synchronizer
    pub snapshot: Option<LatencySnapshot>,

    /// Snapshots taken since start
    pub samples_taken: u64,

    /// Highest baseline seen since start
    pub peak_baseline_ms: f64,

    /// Joins and leaves since start
    pub presence_changes: u64,

    /// Peers currently excluded from the baseline
    excluded: HashSet<String>,

    /// Log entries
    pub logs: VecDeque<LogEntry>,

    /// Monitor status
    pub status: MonitorStatus,
}

impl Metrics {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            start_time: Local::now(),
            local_peer: None,
            config,
            snapshot: None,
            samples_taken: 0,
            peak_baseline_ms: 0.0,
            presence_changes: 0,
            excluded: HashSet::new(),
            logs: VecDeque::with_capacity(MAX_LOG_ENTRIES),
            status: MonitorStatus::Starting,
        }
    }

    /// Add a log entry
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        if self.logs.len() >= MAX_LOG_ENTRIES {
            self.logs.pop_front();
        }
        self.logs.push_back(LogEntry {
            timestamp: Local::now(),
            level,
            message: message.into(),
        });
    }

    /// Fold in a new snapshot, logging baseline moves and outlier changes
    pub fn record_snapshot(&mut self, snapshot: LatencySnapshot) {
        let previous_baseline = self.snapshot.as_ref().map(|s| s.baseline_ms).unwrap_or(0.0);
        if (snapshot.baseline_ms - previous_baseline).abs() >= BASELINE_LOG_THRESHOLD_MS {
            self.log(
                LogLevel::Latency,
                format!(
                    "Baseline {:.1}ms -> {:.1}ms",
                    previous_baseline, snapshot.baseline_ms
                ),
            );
        }

        let now_excluded: HashSet<String> = snapshot
            .peers
            .iter()
            .filter(|p| p.excluded)
            .map(|p| p.peer_id.clone())
            .collect();
        for peer in snapshot.peers.iter().filter(|p| p.excluded) {
            if !self.excluded.contains(&peer.peer_id) {
                self.log(
                    LogLevel::Warning,
                    format!(
                        "{} over cutoff (avg {:.0}ms), not waiting for them",
                        peer.peer_id, peer.average_ms
                    ),
                );
            }
        }
        for peer_id in self.excluded.difference(&now_excluded).cloned().collect::<Vec<_>>() {
            if snapshot.peers.iter().any(|p| p.peer_id == peer_id) {
                self.log(LogLevel::Latency, format!("{} back under cutoff", peer_id));
            }
        }
        self.excluded = now_excluded;

        self.peak_baseline_ms = self.peak_baseline_ms.max(snapshot.baseline_ms);
        self.samples_taken += 1;
        self.snapshot = Some(snapshot);
    }

    pub fn peer_joined(&mut self, peer_id: &str) {
        self.presence_changes += 1;
        self.log(LogLevel::Presence, format!("Joined: {}", peer_id));
    }

    pub fn peer_left(&mut self, peer_id: &str) {
        self.presence_changes += 1;
        self.excluded.remove(peer_id);
        self.log(LogLevel::Presence, format!("Left: {}", peer_id));
    }

    /// Get uptime as formatted string
    pub fn uptime(&self) -> String {
        let duration = Local::now().signed_duration_since(self.start_time);
        let secs = duration.num_seconds();

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else {
            let hours = secs / 3600;
            let mins = (secs % 3600) / 60;
            format!("{}h {}m", hours, mins)
        }
    }
}
