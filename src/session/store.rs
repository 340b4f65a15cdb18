//! The subscribable store binding
//!
//! Adapts the reconciliation engine to a reactive consumer: a current
//! snapshot, a subscribe/notify contract, and an imperative action surface
//! that delegates to the engine. UI layers bind to this; they never talk
//! to the engine's collaborators directly.

use crate::client::http::HttpAuthClient;
use crate::client::transport::{ApiError, AuthTransport, OAuthProvider};
use crate::hooks::HookRegistry;
use crate::models::{ActionOutcome, InitOutcome, Session};
use crate::session::engine::SessionEngine;
use crate::settings::{ConfigError, KeeprsSettings};
use crate::storage::{default_adapter, StorageAdapter, TokenStore};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Guard for a background task spawned by the store. Aborts the task when
/// dropped.
#[derive(Debug)]
pub struct TaskGuard {
    handle: JoinHandle<()>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// The store UI code binds to: snapshot + subscribe over the engine's
/// state transitions, plus the imperative actions.
#[derive(Clone)]
pub struct SessionStore {
    engine: Arc<SessionEngine>,
}

impl SessionStore {
    #[must_use]
    pub fn new(engine: Arc<SessionEngine>) -> Self {
        Self { engine }
    }

    /// Start assembling a store from validated settings.
    #[must_use]
    pub fn builder(settings: KeeprsSettings) -> SessionStoreBuilder {
        SessionStoreBuilder::new(settings)
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<SessionEngine> {
        &self.engine
    }

    /// The hook registry, for registering handlers before `initialize`.
    #[must_use]
    pub fn hooks(&self) -> &Arc<HookRegistry> {
        self.engine.hooks()
    }

    /// The current state snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Session {
        self.engine.snapshot()
    }

    /// Subscribe to state transitions. The receiver yields on every
    /// engine-side mutation; `borrow_and_update` reads the latest state.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.engine.subscribe()
    }

    /// Drive a callback on every state transition until the guard drops.
    #[must_use]
    pub fn on_transition<F>(&self, callback: F) -> TaskGuard
    where
        F: Fn(&Session) + Send + 'static,
    {
        let mut receiver = self.engine.subscribe();
        let handle = tokio::spawn(async move {
            while receiver.changed().await.is_ok() {
                let session = receiver.borrow_and_update().clone();
                callback(&session);
            }
        });
        TaskGuard { handle }
    }

    /// Run the initialization protocol. See
    /// [`SessionEngine::initialize`].
    pub async fn initialize(&self, current_url: Option<&str>) -> InitOutcome {
        self.engine.initialize(current_url).await
    }

    pub async fn login(&self, credentials: Value) -> ActionOutcome {
        self.engine.login(credentials).await
    }

    pub async fn signup(&self, details: Value) -> ActionOutcome {
        self.engine.signup(details).await
    }

    pub async fn logout(&self) -> ActionOutcome {
        self.engine.logout().await
    }

    pub async fn refresh(&self) -> bool {
        self.engine.refresh().await
    }

    pub async fn update_profile(&self, changes: Value) -> ActionOutcome {
        self.engine.update_profile(changes).await
    }

    pub async fn update_password(&self, current: &str, new: &str) -> ActionOutcome {
        self.engine.update_password(current, new).await
    }

    /// Build the provider sign-in redirect URL.
    ///
    /// # Errors
    ///
    /// Returns an error when the provider is not enabled in settings.
    pub fn oauth_sign_in_url(
        &self,
        provider: OAuthProvider,
        redirect_uri: Option<&str>,
    ) -> Result<String, ConfigError> {
        self.engine.oauth_sign_in_url(provider, redirect_uri)
    }

    /// Spawn the periodic refresh driver at the advisory interval from
    /// settings. The engine never schedules refreshes on its own; this
    /// driver is the external scheduler hosts opt into. Returns `None`
    /// when no interval is configured.
    #[must_use]
    pub fn spawn_refresh_driver(&self) -> Option<TaskGuard> {
        let secs = self.engine.settings().session.token_refresh_interval_secs?;
        if secs == 0 {
            return None;
        }
        let engine = Arc::clone(&self.engine);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(secs));
            // consume the immediate first tick; the session was just
            // established or recovered
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if engine.snapshot().authenticated {
                    engine.refresh().await;
                }
            }
        });
        Some(TaskGuard { handle })
    }
}

/// Assembles the collaborator graph behind a [`SessionStore`]: token store
/// over a storage adapter, transport over the token store, engine over
/// both.
pub struct SessionStoreBuilder {
    settings: Arc<KeeprsSettings>,
    storage_dir: Option<PathBuf>,
    adapter: Option<Arc<dyn StorageAdapter>>,
    transport: Option<Arc<dyn AuthTransport>>,
    hooks: Option<Arc<HookRegistry>>,
}

impl SessionStoreBuilder {
    fn new(settings: KeeprsSettings) -> Self {
        Self {
            settings: Arc::new(settings),
            storage_dir: None,
            adapter: None,
            transport: None,
            hooks: None,
        }
    }

    /// Directory for the default file-backed storage adapter. Without one
    /// (and without an explicit adapter) storage degrades to no-ops.
    #[must_use]
    pub fn storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    /// Replace the storage adapter.
    #[must_use]
    pub fn storage_adapter(mut self, adapter: Arc<dyn StorageAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Replace the transport (test doubles, alternative HTTP stacks).
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn AuthTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a pre-populated hook registry.
    #[must_use]
    pub fn hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Build the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the default HTTP transport cannot be
    /// constructed.
    pub fn build(self) -> Result<SessionStore, ApiError> {
        let adapter = self
            .adapter
            .unwrap_or_else(|| default_adapter(self.storage_dir));
        let tokens = Arc::new(TokenStore::new(adapter));
        let transport: Arc<dyn AuthTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpAuthClient::new(
                Arc::clone(&self.settings),
                Arc::clone(&tokens),
            )?),
        };
        let hooks = self.hooks.unwrap_or_default();
        let engine = Arc::new(SessionEngine::new(self.settings, transport, tokens, hooks));
        Ok(SessionStore::new(engine))
    }
}
