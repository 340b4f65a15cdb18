//! Core data types shared across keeprs components

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The remote user record. Opaque to the engine except for the
/// profile-transform hook applied when it is fetched.
pub type Profile = Value;

/// Point-in-time view of the authentication state.
///
/// Owned and mutated exclusively by the reconciliation engine; everything
/// else observes it through cloned snapshots. Invariant: `authenticated ==
/// false` implies `profile` is `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Whether the server currently recognizes this client as signed in
    pub authenticated: bool,
    /// Whether a token refresh is in flight
    pub refreshing: bool,
    /// Whether the initialization protocol has not yet completed
    pub initializing: bool,
    /// The fetched user record, if any
    pub profile: Option<Profile>,
}

impl Session {
    /// The state reported before [`initialize`] has completed, so UI code
    /// observes a loading state rather than a false "signed out".
    ///
    /// [`initialize`]: crate::session::SessionEngine::initialize
    #[must_use]
    pub fn starting() -> Self {
        Self {
            initializing: true,
            ..Self::default()
        }
    }
}

/// An opaque bearer token pair issued by the auth server.
///
/// Never inspected for structure. `Debug` output is redacted so the pair
/// can flow through logging without leaking credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access: String,
    pub refresh: String,
}

impl CredentialPair {
    #[must_use]
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }
}

impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access", &"<redacted>")
            .field("refresh", &"<redacted>")
            .finish()
    }
}

/// A parsed response from the login/signup endpoints.
///
/// Some backends rely purely on cookies and return no tokens; `tokens` is
/// only present when the body carried both `access_token` and
/// `refresh_token`.
#[derive(Debug, Clone)]
pub struct AuthResponse {
    pub tokens: Option<CredentialPair>,
    pub body: Value,
}

impl AuthResponse {
    /// Extract an optional credential pair from a response body.
    #[must_use]
    pub fn from_body(body: Value) -> Self {
        let tokens = match (
            body.get("access_token").and_then(Value::as_str),
            body.get("refresh_token").and_then(Value::as_str),
        ) {
            (Some(access), Some(refresh)) => Some(CredentialPair::new(access, refresh)),
            _ => None,
        };
        Self { tokens, body }
    }
}

/// Structured result of an imperative auth operation.
///
/// Expected failures (bad credentials, expired sessions) are values, not
/// errors; callers never need exception handling for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl ActionOutcome {
    /// Create a successful outcome.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    /// Create a failed outcome carrying a user-facing message.
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Result of the one-shot initialization protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitOutcome {
    /// The application URL with OAuth callback parameters removed, when the
    /// engine consumed tokens from it. The host should apply this via
    /// history replacement before rendering.
    pub stripped_url: Option<String>,
}
