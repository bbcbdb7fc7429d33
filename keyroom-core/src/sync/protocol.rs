//! Sync Protocol Messages

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors at the wire boundary
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("pingTime must be a finite, non-negative timestamp, got {0}")]
    InvalidPingTime(f64),

    #[error("Message carries an empty peer id")]
    EmptyPeerId,
}

/// Discriminant of a latency message, used to subscribe to one kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "LATENCY_PING")]
    LatencyPing,
    #[serde(rename = "LATENCY_PONG")]
    LatencyPong,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::LatencyPing => "LATENCY_PING",
            MessageKind::LatencyPong => "LATENCY_PONG",
        }
    }
}

/// Latency probe sent to a peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ping {
    /// Sender's monotonic clock in ms when the ping left
    pub ping_time: f64,
    /// Sender's own id
    pub peer_id: String,
}

/// Reply to a [`Ping`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pong {
    /// Echo of the original ping's `pingTime`
    pub ping_time: f64,
    /// Id of the peer answering, i.e. the original ping target
    pub peer_id: String,
}

/// Messages exchanged between peers for latency measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "messageType")]
pub enum LatencyMessage {
    #[serde(rename = "LATENCY_PING")]
    Ping(Ping),
    #[serde(rename = "LATENCY_PONG")]
    Pong(Pong),
}

impl LatencyMessage {
    pub fn ping(ping_time: f64, peer_id: impl Into<String>) -> Self {
        LatencyMessage::Ping(Ping {
            ping_time,
            peer_id: peer_id.into(),
        })
    }

    pub fn pong(ping_time: f64, peer_id: impl Into<String>) -> Self {
        LatencyMessage::Pong(Pong {
            ping_time,
            peer_id: peer_id.into(),
        })
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            LatencyMessage::Ping(_) => MessageKind::LatencyPing,
            LatencyMessage::Pong(_) => MessageKind::LatencyPong,
        }
    }

    /// Id of the peer that produced the message
    pub fn peer_id(&self) -> &str {
        match self {
            LatencyMessage::Ping(ping) => &ping.peer_id,
            LatencyMessage::Pong(pong) => &pong.peer_id,
        }
    }

    pub fn ping_time(&self) -> f64 {
        match self {
            LatencyMessage::Ping(ping) => ping.ping_time,
            LatencyMessage::Pong(pong) => pong.ping_time,
        }
    }

    /// Reject payloads no honest peer would send
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let ping_time = self.ping_time();
        if !ping_time.is_finite() || ping_time < 0.0 {
            return Err(ProtocolError::InvalidPingTime(ping_time));
        }
        if self.peer_id().is_empty() {
            return Err(ProtocolError::EmptyPeerId);
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse and validate a message received from the wire
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let message: Self = serde_json::from_slice(bytes)?;
        message.validate()?;
        Ok(message)
    }
}
