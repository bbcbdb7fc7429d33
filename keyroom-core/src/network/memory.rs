//! In-memory peer network
//!
//! A hub connecting endpoints inside one process. Each directed link has a
//! [`LinkProfile`] simulating one-way delay, jitter and loss, which makes it
//! usable both for tests and for rehearsing room conditions. Messages are
//! encoded to bytes on send and decoded on delivery, the same as a real wire.

use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use super::transport::{HandlerRegistry, MessageHandler, PeerTransport, SubscriptionId, TransportError};
use crate::sync::{LatencyMessage, MessageKind};

/// Simulated conditions on a directed link
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkProfile {
    /// Base one-way delay in ms
    pub latency_ms: f64,
    /// Uniform jitter applied as +/- this many ms. Non-finite values mean none.
    pub jitter_ms: f64,
    /// Probability in [0, 1] that a message is silently dropped
    pub loss: f64,
}

impl LinkProfile {
    /// Constant delay, no jitter, no loss
    pub fn fixed(latency_ms: f64) -> Self {
        Self {
            latency_ms,
            jitter_ms: 0.0,
            loss: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter_ms: f64) -> Self {
        self.jitter_ms = jitter_ms;
        self
    }

    pub fn with_loss(mut self, loss: f64) -> Self {
        self.loss = loss;
        self
    }

    /// Delay for one message, or `None` if it is lost
    fn sample_delay<R: Rng>(&self, rng: &mut R) -> Option<Duration> {
        if self.loss > 0.0 && rng.gen::<f64>() < self.loss {
            return None;
        }
        let jitter = if self.jitter_ms.is_finite() && self.jitter_ms > 0.0 {
            rng.gen_range(-self.jitter_ms..=self.jitter_ms)
        } else {
            0.0
        };
        let delay_us = ((self.latency_ms + jitter) * 1000.0).round().max(0.0);
        Some(Duration::from_micros(delay_us as u64))
    }
}

impl Default for LinkProfile {
    fn default() -> Self {
        Self::fixed(0.0)
    }
}

/// Delivery counters for the whole hub
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub delivered: u64,
    pub dropped: u64,
}

struct Hub {
    endpoints: HashMap<String, Arc<HandlerRegistry>>,
    links: HashMap<(String, String), LinkProfile>,
    default_link: LinkProfile,
    stats: NetworkStats,
}

impl Hub {
    fn is_current(&self, peer_id: &str, registry: &Arc<HandlerRegistry>) -> bool {
        self.endpoints
            .get(peer_id)
            .is_some_and(|current| Arc::ptr_eq(current, registry))
    }

    fn link(&self, from: &str, to: &str) -> LinkProfile {
        self.links
            .get(&(from.to_string(), to.to_string()))
            .copied()
            .unwrap_or(self.default_link)
    }
}

/// Shared in-process network. Cloning yields another handle to the same hub.
#[derive(Clone)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl MemoryNetwork {
    pub fn new(default_link: LinkProfile) -> Self {
        Self {
            hub: Arc::new(Mutex::new(Hub {
                endpoints: HashMap::new(),
                links: HashMap::new(),
                default_link,
                stats: NetworkStats::default(),
            })),
        }
    }

    /// Attach a peer. Reconnecting an id detaches its previous endpoint.
    pub fn connect(&self, peer_id: impl Into<String>) -> MemoryEndpoint {
        let peer_id = peer_id.into();
        let registry = Arc::new(HandlerRegistry::new());
        self.hub
            .lock()
            .endpoints
            .insert(peer_id.clone(), Arc::clone(&registry));
        debug!("Memory network: {} connected", peer_id);

        MemoryEndpoint {
            peer_id,
            network: self.clone(),
            registry,
        }
    }

    /// Detach a peer. Messages already in flight to it are dropped.
    pub fn disconnect(&self, peer_id: &str) -> bool {
        let removed = self.hub.lock().endpoints.remove(peer_id).is_some();
        if removed {
            debug!("Memory network: {} disconnected", peer_id);
        }
        removed
    }

    /// Set the conditions for both directions between two peers
    pub fn set_link(&self, a: &str, b: &str, profile: LinkProfile) {
        self.set_route(a, b, profile);
        self.set_route(b, a, profile);
    }

    /// Set the conditions for messages from `from` to `to`
    pub fn set_route(&self, from: &str, to: &str, profile: LinkProfile) {
        self.hub
            .lock()
            .links
            .insert((from.to_string(), to.to_string()), profile);
    }

    pub fn peer_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.hub.lock().endpoints.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn stats(&self) -> NetworkStats {
        self.hub.lock().stats
    }

    fn deliver(&self, sender: &str, target: &str, registry: &Arc<HandlerRegistry>, bytes: &[u8]) {
        {
            let mut hub = self.hub.lock();
            if !hub.is_current(target, registry) {
                hub.stats.dropped += 1;
                debug!("Memory network: {} left before delivery from {}", target, sender);
                return;
            }
            hub.stats.delivered += 1;
        }

        match LatencyMessage::decode(bytes) {
            Ok(message) => {
                registry.dispatch(sender, message);
            }
            Err(e) => warn!("Dropping undecodable message from {}: {}", sender, e),
        }
    }
}

/// One peer's attachment to a [`MemoryNetwork`]
pub struct MemoryEndpoint {
    peer_id: String,
    network: MemoryNetwork,
    registry: Arc<HandlerRegistry>,
}

impl MemoryEndpoint {
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// False once disconnected or replaced by a newer endpoint for this id
    pub fn is_connected(&self) -> bool {
        self.network.hub.lock().is_current(&self.peer_id, &self.registry)
    }
}

impl PeerTransport for MemoryEndpoint {
    fn send_to_peer(&self, peer_id: &str, message: &LatencyMessage) -> Result<(), TransportError> {
        let runtime = Handle::try_current().map_err(|_| TransportError::NoRuntime)?;
        let bytes = message.encode()?;

        let (target_registry, delay) = {
            let mut hub = self.network.hub.lock();
            if !hub.is_current(&self.peer_id, &self.registry) {
                return Err(TransportError::Disconnected(self.peer_id.clone()));
            }
            let target_registry = hub
                .endpoints
                .get(peer_id)
                .cloned()
                .ok_or_else(|| TransportError::PeerUnreachable(peer_id.to_string()))?;

            match hub.link(&self.peer_id, peer_id).sample_delay(&mut rand::thread_rng()) {
                Some(delay) => (target_registry, delay),
                None => {
                    hub.stats.dropped += 1;
                    return Ok(());
                }
            }
        };

        let network = self.network.clone();
        let sender = self.peer_id.clone();
        let target = peer_id.to_string();
        runtime.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            network.deliver(&sender, &target, &target_registry, &bytes);
        });
        Ok(())
    }

    fn subscribe(&self, kind: MessageKind, handler: MessageHandler) -> SubscriptionId {
        self.registry.subscribe(kind, handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.registry.unsubscribe(id);
    }

    fn active_peer_ids(&self) -> Vec<String> {
        let hub = self.network.hub.lock();
        if !hub.is_current(&self.peer_id, &self.registry) {
            return Vec::new();
        }
        let mut ids: Vec<String> = hub
            .endpoints
            .keys()
            .filter(|id| **id != self.peer_id)
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}
