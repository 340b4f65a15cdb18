//! Test fixtures providing pre-built test objects

use crate::hooks::HookRegistry;
use crate::models::CredentialPair;
use crate::session::engine::SessionEngine;
use crate::session::store::SessionStore;
use crate::settings::{KeeprsSettings, StorageStrategy};
use crate::storage::TokenStore;
use crate::testing::mock::MockTransport;
use serde_json::{json, Value};
use std::sync::Arc;

use super::constants::{TEST_ACCESS_TOKEN, TEST_EMAIL, TEST_REFRESH_TOKEN};

/// Central fixture provider for all test data
pub struct TestFixtures;

impl TestFixtures {
    /// Standard settings for engine tests.
    ///
    /// # Panics
    ///
    /// Panics if the fixture settings fail validation (should never
    /// happen).
    #[must_use]
    pub fn settings() -> KeeprsSettings {
        Self::settings_with_strategy(StorageStrategy::CookieFirst)
    }

    /// Settings with a specific storage strategy.
    ///
    /// # Panics
    ///
    /// Panics if the fixture settings fail validation (should never
    /// happen).
    #[must_use]
    pub fn settings_with_strategy(strategy: StorageStrategy) -> KeeprsSettings {
        KeeprsSettings::builder("https://api.example.com")
            .app_origin("https://app.example.com")
            .storage_strategy(strategy)
            .google("google-client-id")
            .build()
            .expect("fixture settings must validate")
    }

    /// The profile the default mock transport serves.
    #[must_use]
    pub fn profile() -> Value {
        json!({
            "id": "user-1",
            "email": TEST_EMAIL,
            "name": "Test User"
        })
    }

    /// A standard opaque token pair.
    #[must_use]
    pub fn credential_pair() -> CredentialPair {
        CredentialPair::new(TEST_ACCESS_TOKEN, TEST_REFRESH_TOKEN)
    }

    /// An engine over a mock transport and in-memory storage, exposing
    /// both for scripting and assertions.
    #[must_use]
    pub fn engine(settings: KeeprsSettings) -> (Arc<SessionEngine>, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        let tokens = Arc::new(TokenStore::in_memory());
        let engine = Arc::new(SessionEngine::new(
            Arc::new(settings),
            Arc::<MockTransport>::clone(&transport),
            tokens,
            Arc::new(HookRegistry::new()),
        ));
        (engine, transport)
    }

    /// A session store over a mock transport, for binding-level tests.
    #[must_use]
    pub fn store(settings: KeeprsSettings) -> (SessionStore, Arc<MockTransport>) {
        let (engine, transport) = Self::engine(settings);
        (SessionStore::new(engine), transport)
    }
}
