//! Mock objects and fake implementations for testing
//!
//! [`MockTransport`] stands in for the HTTP transport in engine tests:
//! every operation is scripted with queued one-shot replies over a sticky
//! fallback, and counts its calls so tests can assert how often the
//! network was actually touched.

use crate::client::transport::{ApiError, AuthTransport, OAuthProvider};
use crate::models::{AuthResponse, Profile};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// A scripted reply for one mock operation call.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// A 2xx response with this JSON body
    Success(Value),
    /// A non-2xx response
    Failure { status: u16, message: String },
}

impl MockReply {
    /// A 401 reply, the common trigger for refresh/fallback logic.
    #[must_use]
    pub fn unauthorized() -> Self {
        Self::Failure {
            status: 401,
            message: "Unauthorized".to_string(),
        }
    }

    /// A 500 reply.
    #[must_use]
    pub fn server_error() -> Self {
        Self::Failure {
            status: 500,
            message: "Internal Server Error".to_string(),
        }
    }

    fn into_result(self) -> Result<Value, ApiError> {
        match self {
            Self::Success(body) => Ok(body),
            Self::Failure { status, message } => Err(ApiError::Status { status, message }),
        }
    }
}

/// Scripted replies for one operation: queued one-shot replies are
/// consumed first, then the sticky fallback repeats.
struct Script<T: Clone> {
    queue: Mutex<VecDeque<T>>,
    fallback: Mutex<T>,
    calls: AtomicUsize,
}

impl<T: Clone> Script<T> {
    fn new(fallback: T) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            calls: AtomicUsize::new(0),
        }
    }

    fn next(&self) -> T {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().unwrap().clone())
    }

    fn push(&self, reply: T) {
        self.queue.lock().unwrap().push_back(reply);
    }

    fn set_fallback(&self, reply: T) {
        *self.fallback.lock().unwrap() = reply;
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Scriptable stand-in for the auth transport.
pub struct MockTransport {
    login: Script<MockReply>,
    signup: Script<MockReply>,
    logout: Script<MockReply>,
    check_session: Script<MockReply>,
    profile: Script<MockReply>,
    profile_update: Script<MockReply>,
    password_update: Script<MockReply>,
    refresh: Script<bool>,
    refresh_delay: Mutex<Option<Duration>>,
    login_payloads: Mutex<Vec<Value>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            login: Script::new(MockReply::Success(json!({}))),
            signup: Script::new(MockReply::Success(json!({}))),
            logout: Script::new(MockReply::Success(json!({}))),
            check_session: Script::new(MockReply::Success(json!({"authenticated": false}))),
            profile: Script::new(MockReply::Success(json!({
                "id": "user-1",
                "email": super::constants::TEST_EMAIL,
                "name": "Test User"
            }))),
            // Null means "echo the submitted changes back"
            profile_update: Script::new(MockReply::Success(Value::Null)),
            password_update: Script::new(MockReply::Success(json!({}))),
            refresh: Script::new(false),
            refresh_delay: Mutex::new(None),
            login_payloads: Mutex::new(Vec::new()),
        }
    }
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_login(&self, reply: MockReply) {
        self.login.push(reply);
    }

    pub fn set_login(&self, reply: MockReply) {
        self.login.set_fallback(reply);
    }

    pub fn push_signup(&self, reply: MockReply) {
        self.signup.push(reply);
    }

    pub fn set_logout(&self, reply: MockReply) {
        self.logout.set_fallback(reply);
    }

    pub fn push_check_session(&self, reply: MockReply) {
        self.check_session.push(reply);
    }

    pub fn set_check_session(&self, reply: MockReply) {
        self.check_session.set_fallback(reply);
    }

    pub fn push_profile(&self, reply: MockReply) {
        self.profile.push(reply);
    }

    pub fn set_profile(&self, reply: MockReply) {
        self.profile.set_fallback(reply);
    }

    pub fn push_profile_update(&self, reply: MockReply) {
        self.profile_update.push(reply);
    }

    pub fn push_password_update(&self, reply: MockReply) {
        self.password_update.push(reply);
    }

    pub fn set_refresh_result(&self, refreshed: bool) {
        self.refresh.set_fallback(refreshed);
    }

    pub fn push_refresh_result(&self, refreshed: bool) {
        self.refresh.push(refreshed);
    }

    /// Make each refresh call take this long, so tests can overlap
    /// concurrent refresh attempts deterministically.
    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = Some(delay);
    }

    #[must_use]
    pub fn login_calls(&self) -> usize {
        self.login.calls()
    }

    #[must_use]
    pub fn signup_calls(&self) -> usize {
        self.signup.calls()
    }

    #[must_use]
    pub fn logout_calls(&self) -> usize {
        self.logout.calls()
    }

    #[must_use]
    pub fn check_session_calls(&self) -> usize {
        self.check_session.calls()
    }

    #[must_use]
    pub fn profile_calls(&self) -> usize {
        self.profile.calls()
    }

    #[must_use]
    pub fn refresh_calls(&self) -> usize {
        self.refresh.calls()
    }

    #[must_use]
    pub fn password_update_calls(&self) -> usize {
        self.password_update.calls()
    }

    /// The credentials body the last login call carried, after hook
    /// transformations.
    #[must_use]
    pub fn last_login_payload(&self) -> Option<Value> {
        self.login_payloads.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl AuthTransport for MockTransport {
    async fn login(&self, credentials: Value) -> Result<AuthResponse, ApiError> {
        self.login_payloads.lock().unwrap().push(credentials);
        self.login.next().into_result().map(AuthResponse::from_body)
    }

    async fn signup(&self, _details: Value) -> Result<AuthResponse, ApiError> {
        self.signup
            .next()
            .into_result()
            .map(AuthResponse::from_body)
    }

    async fn logout(&self) -> Result<(), ApiError> {
        self.logout.next().into_result().map(|_| ())
    }

    async fn check_session(&self) -> Result<bool, ApiError> {
        let body = self.check_session.next().into_result()?;
        Ok(body
            .get("authenticated")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    async fn fetch_profile(&self) -> Result<Profile, ApiError> {
        self.profile.next().into_result()
    }

    async fn update_profile(&self, changes: Value) -> Result<Profile, ApiError> {
        match self.profile_update.next().into_result()? {
            Value::Null => Ok(changes),
            body => Ok(body),
        }
    }

    async fn update_password(&self, _current: &str, _new: &str) -> Result<(), ApiError> {
        self.password_update.next().into_result().map(|_| ())
    }

    async fn refresh_token(&self) -> bool {
        let delay = *self.refresh_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.refresh.next()
    }

    fn oauth_redirect_url(&self, provider: OAuthProvider, redirect_uri: Option<&str>) -> String {
        format!(
            "https://auth.mock/login/{provider}?redirect_uri={}",
            urlencoding::encode(redirect_uri.unwrap_or("https://app.example.com"))
        )
    }
}
