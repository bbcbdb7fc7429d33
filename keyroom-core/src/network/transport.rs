//! Peer transport seam
//!
//! The synchronizer talks to peers only through [`PeerTransport`]. Concrete
//! transports (data channels, the in-memory hub) implement it and use
//! [`HandlerRegistry`] for subscription bookkeeping.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::sync::{LatencyMessage, MessageKind, ProtocolError};

/// Transport-related errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Peer not reachable: {0}")]
    PeerUnreachable(String),

    #[error("Endpoint disconnected: {0}")]
    Disconnected(String),

    #[error("No async runtime available to deliver messages")]
    NoRuntime,

    #[error("Failed to encode message: {0}")]
    Encode(#[from] ProtocolError),
}

/// Callback for inbound messages: `(sender_peer_id, message)`
pub type MessageHandler = Arc<dyn Fn(&str, LatencyMessage) + Send + Sync>;

/// Handle returned by [`PeerTransport::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Unreliable, per-peer ordered message transport
pub trait PeerTransport: Send + Sync {
    /// Send a message to one peer. Fails synchronously when the peer's
    /// channel is not open.
    fn send_to_peer(&self, peer_id: &str, message: &LatencyMessage) -> Result<(), TransportError>;

    /// Register a handler for one message kind
    fn subscribe(&self, kind: MessageKind, handler: MessageHandler) -> SubscriptionId;

    /// Remove a handler. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Snapshot of currently reachable peers
    fn active_peer_ids(&self) -> Vec<String>;
}

/// Subscription table shared by transport implementations
#[derive(Default)]
pub struct HandlerRegistry {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<SubscriptionId, (MessageKind, MessageHandler)>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kind: MessageKind, handler: MessageHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.lock().insert(id, (kind, handler));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.handlers.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.lock().is_empty()
    }

    /// Call every handler subscribed to the message's kind. Returns how many
    /// handlers ran.
    ///
    /// Handlers run without the table locked, so they may subscribe or
    /// unsubscribe themselves.
    pub fn dispatch(&self, sender: &str, message: LatencyMessage) -> usize {
        let kind = message.kind();
        let matching: Vec<MessageHandler> = self
            .handlers
            .lock()
            .values()
            .filter(|(k, _)| *k == kind)
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in &matching {
            handler(sender, message.clone());
        }
        matching.len()
    }
}
