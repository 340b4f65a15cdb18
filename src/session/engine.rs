//! The session reconciliation engine
//!
//! Owns the authentication state machine: `Uninitialized → Initializing →
//! {Unauthenticated, Authenticated}`, with an orthogonal `refreshing`
//! sub-flag. There are no terminal states; the machine cycles between
//! authenticated and unauthenticated for the life of the process.
//!
//! The engine takes its collaborators — transport, token store, hook
//! registry — as injected dependencies, so test doubles substitute for the
//! network without touching any of the reconciliation logic.

use crate::client::transport::{AuthTransport, OAuthProvider};
use crate::hooks::{HookContext, HookPayload, HookPoint, HookRegistry};
use crate::models::{ActionOutcome, CredentialPair, InitOutcome, Session};
use crate::settings::{ConfigError, KeeprsSettings};
use crate::storage::TokenStore;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// How often refresh waiters re-check the in-flight flag
const REFRESH_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What a profile fetch attempt concluded. Callers decide whether
/// `Unauthorized` forces a transition to unauthenticated; only the
/// initialization auth-check path does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProfileOutcome {
    Loaded,
    Unauthorized,
    Failed,
}

/// Which credential flow an authenticate call runs; login and signup share
/// their completion logic.
#[derive(Debug, Clone, Copy)]
enum AuthFlow {
    Login,
    Signup,
}

impl AuthFlow {
    fn before(self) -> HookPoint {
        match self {
            Self::Login => HookPoint::BeforeLogin,
            Self::Signup => HookPoint::BeforeSignup,
        }
    }

    fn after(self) -> HookPoint {
        match self {
            Self::Login => HookPoint::AfterLogin,
            Self::Signup => HookPoint::AfterSignup,
        }
    }

    fn on_error(self) -> HookPoint {
        match self {
            Self::Login => HookPoint::LoginError,
            Self::Signup => HookPoint::SignupError,
        }
    }
}

/// The reconciliation engine. One instance per authenticated client.
pub struct SessionEngine {
    settings: Arc<KeeprsSettings>,
    transport: Arc<dyn AuthTransport>,
    tokens: Arc<TokenStore>,
    hooks: Arc<HookRegistry>,
    state: watch::Sender<Session>,
    /// Tokens received but not yet known to be necessary; either promoted
    /// to persistent storage (cookies proven broken) or discarded (cookies
    /// proven sufficient). Process-local, never persisted.
    pending: Mutex<Option<CredentialPair>>,
    initialized: AtomicBool,
    refresh_in_flight: AtomicBool,
}

impl SessionEngine {
    #[must_use]
    pub fn new(
        settings: Arc<KeeprsSettings>,
        transport: Arc<dyn AuthTransport>,
        tokens: Arc<TokenStore>,
        hooks: Arc<HookRegistry>,
    ) -> Self {
        let (state, _) = watch::channel(Session::starting());
        Self {
            settings,
            transport,
            tokens,
            hooks,
            state,
            pending: Mutex::new(None),
            initialized: AtomicBool::new(false),
            refresh_in_flight: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &Arc<KeeprsSettings> {
        &self.settings
    }

    #[must_use]
    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    #[must_use]
    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// The current state snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Session {
        self.state.borrow().clone()
    }

    /// Subscribe to state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    fn update(&self, mutate: impl FnOnce(&mut Session)) {
        self.state.send_modify(mutate);
    }

    fn set_unauthenticated(&self) {
        self.update(|session| {
            session.authenticated = false;
            session.profile = None;
        });
    }

    fn hook_context(&self) -> HookContext {
        HookContext {
            settings: Arc::clone(&self.settings),
            tokens: Arc::clone(&self.tokens),
            transport: Arc::clone(&self.transport),
        }
    }

    async fn trigger(&self, point: HookPoint, payload: HookPayload) -> HookPayload {
        self.hooks
            .trigger(point, payload, &self.hook_context())
            .await
    }

    /// Run the initialization protocol. Exactly once per engine instance;
    /// repeated invocation is a no-op.
    ///
    /// `current_url` is the host application's current URL, inspected for
    /// OAuth callback parameters. When tokens are consumed from it, the
    /// returned outcome carries the URL with those parameters stripped for
    /// the host to apply via history replacement (no reload).
    ///
    /// `initializing` is reset in every exit path, so the UI can never
    /// observe an infinite loading state.
    pub async fn initialize(&self, current_url: Option<&str>) -> InitOutcome {
        if self.initialized.swap(true, Ordering::SeqCst) {
            log::debug!("initialize called more than once, ignoring");
            return InitOutcome::default();
        }
        self.update(|session| session.initializing = true);
        let outcome = self.run_initialization(current_url).await;
        self.update(|session| session.initializing = false);
        outcome
    }

    async fn run_initialization(&self, current_url: Option<&str>) -> InitOutcome {
        // OAuth callback tokens in the URL preempt every other recovery path
        if let Some(raw) = current_url {
            if let Some((pair, stripped)) = extract_callback_tokens(raw) {
                log::debug!("Consuming OAuth callback tokens from application URL");
                self.tokens.clear();
                *self.pending.lock().unwrap() = Some(pair);
                self.update(|session| session.authenticated = true);
                if self.fetch_profile().await == ProfileOutcome::Unauthorized {
                    self.set_unauthenticated();
                }
                return InitOutcome {
                    stripped_url: Some(stripped),
                };
            }
        }

        // Tokens already staged by a racing login in the same tick: the
        // session is being established, nothing to reconcile over the wire.
        if self.pending.lock().unwrap().is_some() {
            return InitOutcome::default();
        }

        self.run_auth_check().await;
        InitOutcome::default()
    }

    /// Ask the server what the current authentication state is and recover
    /// it, refreshing once where that can still save the session.
    async fn run_auth_check(&self) {
        let strategy = self.settings.session.storage_strategy;

        // A refresh token alone cannot authenticate requests; recover an
        // access token before asking the server anything.
        if self.tokens.should_use_fallback(strategy)
            && self.tokens.access_token().is_none()
            && self.tokens.refresh_token().is_some()
            && !self.refresh().await
        {
            self.fail_auth_check("token refresh failed during initialization")
                .await;
            return;
        }

        let confirmed = match self.transport.check_session().await {
            Ok(confirmed) => confirmed,
            Err(e) => {
                log::debug!("Session check failed: {e}");
                false
            }
        };

        if confirmed || self.refresh().await {
            self.update(|session| session.authenticated = true);
            if self.fetch_profile().await == ProfileOutcome::Unauthorized {
                self.set_unauthenticated();
            }
        } else {
            self.fail_auth_check("session could not be recovered").await;
        }
    }

    async fn fail_auth_check(&self, reason: &str) {
        self.set_unauthenticated();
        self.tokens.clear();
        self.trigger(HookPoint::AuthError, HookPayload::Error(reason.to_string()))
            .await;
    }

    /// Refresh the session, serialized across concurrent callers.
    ///
    /// If a refresh is already in flight, this waits it out on a fixed
    /// poll interval and returns the engine's current authenticated flag
    /// rather than issuing a duplicate network call. Success sets
    /// `authenticated`; failure leaves it unchanged — the caller decides
    /// whether a failed refresh is terminal.
    pub async fn refresh(&self) -> bool {
        if self
            .refresh_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            while self.refresh_in_flight.load(Ordering::SeqCst) {
                tokio::time::sleep(REFRESH_POLL_INTERVAL).await;
            }
            return self.snapshot().authenticated;
        }

        self.update(|session| session.refreshing = true);
        self.trigger(HookPoint::BeforeTokenRefresh, HookPayload::Empty)
            .await;

        let refreshed = self.transport.refresh_token().await;

        self.update(|session| {
            session.refreshing = false;
            if refreshed {
                session.authenticated = true;
            }
        });
        self.refresh_in_flight.store(false, Ordering::SeqCst);

        if refreshed {
            self.trigger(HookPoint::AfterTokenRefresh, HookPayload::Empty)
                .await;
        } else {
            log::debug!("Token refresh failed");
            self.trigger(
                HookPoint::TokenRefreshError,
                HookPayload::Error("token refresh failed".to_string()),
            )
            .await;
        }
        refreshed
    }

    /// Fetch the profile: first attempt, then at most one retry once the
    /// 401/422 branch has been resolved. The bound is structural — the
    /// loop runs twice and the recovery branches only fire on the first
    /// attempt.
    async fn fetch_profile(&self) -> ProfileOutcome {
        for attempt in 0..2 {
            match self.transport.fetch_profile().await {
                Ok(raw) => {
                    if attempt == 0 && self.pending.lock().unwrap().take().is_some() {
                        // Cookie auth worked while tokens were still
                        // staged: cookie mode is confirmed sufficient.
                        log::debug!("Cookie session confirmed, discarding staged tokens");
                        self.tokens.clear();
                    }
                    let profile = self
                        .trigger(HookPoint::TransformProfile, HookPayload::Profile(raw))
                        .await
                        .into_value()
                        .unwrap_or(Value::Null);
                    self.update(|session| session.profile = Some(profile));
                    return ProfileOutcome::Loaded;
                }
                Err(e) if e.is_authorization_expired() && attempt == 0 => {
                    let staged = self.pending.lock().unwrap().take();
                    if let Some(pair) = staged {
                        // Cookies demonstrably do not work: promote the
                        // staged pair to persistent storage and retry in
                        // token mode.
                        log::debug!("Cookie session rejected, persisting staged tokens");
                        self.tokens.set_tokens(&pair);
                        continue;
                    }
                    self.trigger(HookPoint::AuthError, HookPayload::Error(e.to_string()))
                        .await;
                    if self.refresh().await {
                        continue;
                    }
                    self.update(|session| session.profile = None);
                    return ProfileOutcome::Unauthorized;
                }
                Err(e) => {
                    log::debug!("Profile fetch failed: {e}");
                    self.update(|session| session.profile = None);
                    return ProfileOutcome::Failed;
                }
            }
        }
        ProfileOutcome::Failed
    }

    /// Authenticate with credentials. Never throws past this boundary:
    /// expected failures come back as `{success: false, error}`.
    pub async fn login(&self, credentials: Value) -> ActionOutcome {
        self.authenticate(AuthFlow::Login, credentials).await
    }

    /// Register an account and authenticate. Same completion logic as
    /// [`login`](Self::login).
    pub async fn signup(&self, details: Value) -> ActionOutcome {
        self.authenticate(AuthFlow::Signup, details).await
    }

    async fn authenticate(&self, flow: AuthFlow, payload: Value) -> ActionOutcome {
        // No stale credentials mixed across accounts
        self.tokens.clear();
        self.pending.lock().unwrap().take();

        let payload = self
            .trigger(flow.before(), HookPayload::Credentials(payload))
            .await
            .into_value()
            .unwrap_or(Value::Null);

        let result = match flow {
            AuthFlow::Login => self.transport.login(payload).await,
            AuthFlow::Signup => self.transport.signup(payload).await,
        };

        match result {
            Ok(response) => {
                // Some backends rely purely on cookies and return no
                // tokens; the completion below runs either way.
                if let Some(pair) = response.tokens {
                    *self.pending.lock().unwrap() = Some(pair);
                }
                self.update(|session| session.authenticated = true);
                let _ = self.fetch_profile().await;
                self.trigger(flow.after(), HookPayload::Response(response.body))
                    .await;
                ActionOutcome::ok()
            }
            Err(e) => {
                self.set_unauthenticated();
                self.trigger(flow.on_error(), HookPayload::Error(e.to_string()))
                    .await;
                ActionOutcome::failure(e.to_string())
            }
        }
    }

    /// Log out. The server call is best-effort; local cleanup is
    /// unconditional, because a failed logout must never leave the client
    /// believing it is still authenticated.
    pub async fn logout(&self) -> ActionOutcome {
        self.trigger(HookPoint::BeforeLogout, HookPayload::Empty)
            .await;

        let server_result = self.transport.logout().await;

        self.set_unauthenticated();
        self.tokens.clear();
        self.pending.lock().unwrap().take();

        match server_result {
            Ok(()) => {
                self.trigger(HookPoint::AfterLogout, HookPayload::Empty)
                    .await;
                ActionOutcome::ok()
            }
            Err(e) => {
                log::warn!("Server logout failed, local state cleared anyway: {e}");
                self.trigger(HookPoint::LogoutError, HookPayload::Error(e.to_string()))
                    .await;
                ActionOutcome {
                    success: true,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Update the user record. The stored profile is replaced with the
    /// server's response on success.
    pub async fn update_profile(&self, changes: Value) -> ActionOutcome {
        let changes = self
            .trigger(HookPoint::BeforeProfileUpdate, HookPayload::Profile(changes))
            .await
            .into_value()
            .unwrap_or(Value::Null);

        match self.transport.update_profile(changes).await {
            Ok(profile) => {
                self.update(|session| session.profile = Some(profile.clone()));
                self.trigger(HookPoint::AfterProfileUpdate, HookPayload::Profile(profile))
                    .await;
                ActionOutcome::ok()
            }
            Err(e) => self.operation_failed(HookPoint::ProfileUpdateError, &e).await,
        }
    }

    /// Change the account password.
    pub async fn update_password(&self, current: &str, new: &str) -> ActionOutcome {
        self.trigger(HookPoint::BeforePasswordUpdate, HookPayload::Empty)
            .await;

        match self.transport.update_password(current, new).await {
            Ok(()) => {
                self.trigger(HookPoint::AfterPasswordUpdate, HookPayload::Empty)
                    .await;
                ActionOutcome::ok()
            }
            Err(e) => {
                self.operation_failed(HookPoint::PasswordUpdateError, &e)
                    .await
            }
        }
    }

    async fn operation_failed(
        &self,
        point: HookPoint,
        error: &crate::client::transport::ApiError,
    ) -> ActionOutcome {
        if error.is_authorization_expired() {
            self.trigger(HookPoint::AuthError, HookPayload::Error(error.to_string()))
                .await;
        }
        self.trigger(point, HookPayload::Error(error.to_string()))
            .await;
        ActionOutcome::failure(error.to_string())
    }

    /// Build the provider sign-in redirect URL.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ProviderDisabled`] when the provider is not
    /// enabled in settings.
    pub fn oauth_sign_in_url(
        &self,
        provider: OAuthProvider,
        redirect_uri: Option<&str>,
    ) -> Result<String, ConfigError> {
        let enabled = match provider {
            OAuthProvider::Google => self.settings.providers.google.enabled,
            OAuthProvider::Microsoft => self.settings.providers.microsoft.enabled,
        };
        if !enabled {
            return Err(ConfigError::ProviderDisabled(provider.as_str().to_string()));
        }
        Ok(self.transport.oauth_redirect_url(provider, redirect_uri))
    }
}

/// Pull `access_token`/`refresh_token` out of a callback URL.
///
/// Returns the pair and the URL with both parameters stripped — only when
/// both are present; a lone token leaves the URL untouched.
fn extract_callback_tokens(raw_url: &str) -> Option<(CredentialPair, String)> {
    let mut parsed = url::Url::parse(raw_url).ok()?;

    let mut access = None;
    let mut refresh = None;
    let retained: Vec<(String, String)> = parsed
        .query_pairs()
        .filter_map(|(key, value)| match key.as_ref() {
            "access_token" => {
                access = Some(value.into_owned());
                None
            }
            "refresh_token" => {
                refresh = Some(value.into_owned());
                None
            }
            _ => Some((key.into_owned(), value.into_owned())),
        })
        .collect();

    let pair = CredentialPair::new(access?, refresh?);

    if retained.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(&retained);
    }
    Some((pair, parsed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_tokens_extracted_and_stripped() {
        let (pair, stripped) = extract_callback_tokens(
            "https://app.example.com/welcome?access_token=a&refresh_token=b",
        )
        .expect("both tokens present");
        assert_eq!(pair.access, "a");
        assert_eq!(pair.refresh, "b");
        assert_eq!(stripped, "https://app.example.com/welcome");
    }

    #[test]
    fn unrelated_query_parameters_survive_stripping() {
        let (_, stripped) = extract_callback_tokens(
            "https://app.example.com/cb?tab=home&access_token=a&refresh_token=b",
        )
        .unwrap();
        assert_eq!(stripped, "https://app.example.com/cb?tab=home");
    }

    #[test]
    fn lone_token_is_not_a_callback() {
        assert!(
            extract_callback_tokens("https://app.example.com/?access_token=a").is_none()
        );
        assert!(
            extract_callback_tokens("https://app.example.com/?refresh_token=b").is_none()
        );
        assert!(extract_callback_tokens("https://app.example.com/").is_none());
    }

    #[test]
    fn invalid_url_is_not_a_callback() {
        assert!(extract_callback_tokens("not a url").is_none());
    }
}
