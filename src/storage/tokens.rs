//! Token store and the fallback-mode decision

use crate::models::CredentialPair;
use crate::settings::StorageStrategy;
use crate::storage::adapter::StorageAdapter;
use std::sync::Arc;

/// Persisted key for the access token
pub const ACCESS_TOKEN_KEY: &str = "keeprs.access_token";
/// Persisted key for the refresh token
pub const REFRESH_TOKEN_KEY: &str = "keeprs.refresh_token";
/// Persisted key for the fallback-active flag
pub const FALLBACK_ACTIVE_KEY: &str = "keeprs.fallback_active";

/// Owns the one storage backend and the three persisted keys: the bearer
/// token pair and the fallback-active flag.
///
/// The flag is a one-way ratchet: it is set the first time a pair is
/// written and only an explicit [`clear`](TokenStore::clear) resets it.
/// Once fallback is detected the engine never again silently prefers
/// cookies.
pub struct TokenStore {
    adapter: Arc<dyn StorageAdapter>,
}

impl TokenStore {
    #[must_use]
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self { adapter }
    }

    /// Convenience constructor for volatile in-process storage.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(crate::storage::adapter::MemoryStorage::new()))
    }

    /// Persist a credential pair. Always sets the fallback-active flag.
    pub fn set_tokens(&self, pair: &CredentialPair) {
        self.adapter.set(ACCESS_TOKEN_KEY, &pair.access);
        self.adapter.set(REFRESH_TOKEN_KEY, &pair.refresh);
        self.adapter.set(FALLBACK_ACTIVE_KEY, "true");
        log::debug!("Persisted credential pair, fallback storage is now active");
    }

    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.adapter.get(ACCESS_TOKEN_KEY)
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<String> {
        self.adapter.get(REFRESH_TOKEN_KEY)
    }

    #[must_use]
    pub fn is_fallback_active(&self) -> bool {
        self.adapter
            .get(FALLBACK_ACTIVE_KEY)
            .is_some_and(|v| v == "true")
    }

    /// Remove all three persisted keys.
    ///
    /// Delegates to the adapter's whole-backend clear, which the adapter
    /// contract requires to be atomic for readers: no partial-clear state
    /// is observable by a subsequent read.
    pub fn clear(&self) {
        self.adapter.clear();
        log::debug!("Cleared persisted credentials");
    }

    /// Decide whether requests should carry bearer tokens instead of
    /// relying on cookies.
    ///
    /// `fallback-only` forces tokens; otherwise tokens are used once the
    /// ratchet flag is set or either token is present, and cookies are
    /// trusted only when storage is empty.
    #[must_use]
    pub fn should_use_fallback(&self, strategy: StorageStrategy) -> bool {
        if strategy == StorageStrategy::FallbackOnly {
            return true;
        }
        self.is_fallback_active() || self.access_token().is_some() || self.refresh_token().is_some()
    }
}
