//! Local identity resolution
//!
//! The session decides who "we" are; until it has, latency work that needs
//! our id is skipped rather than failed.

use parking_lot::RwLock;

/// Synchronous accessor for the local user id
pub trait IdentityProvider: Send + Sync {
    /// Our user id, or `None` while the session is still bootstrapping
    fn my_user_id(&self) -> Option<String>;
}

/// Identity known at construction
#[derive(Debug, Clone)]
pub struct StaticIdentity(String);

impl StaticIdentity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self(user_id.into())
    }
}

impl IdentityProvider for StaticIdentity {
    fn my_user_id(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Identity filled in once the session bootstrap completes
#[derive(Debug, Default)]
pub struct DeferredIdentity {
    user_id: RwLock<Option<String>>,
}

impl DeferredIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, user_id: impl Into<String>) {
        *self.user_id.write() = Some(user_id.into());
    }

    pub fn is_resolved(&self) -> bool {
        self.user_id.read().is_some()
    }
}

impl IdentityProvider for DeferredIdentity {
    fn my_user_id(&self) -> Option<String> {
        self.user_id.read().clone()
    }
}
