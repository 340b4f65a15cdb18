//! The transport seam between the reconciliation engine and the auth API
//!
//! The engine never talks HTTP directly; it depends on [`AuthTransport`]
//! so test doubles can stand in for the network without touching engine
//! logic.

use crate::models::{AuthResponse, Profile};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Errors surfaced by transport operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The server answered with a non-2xx status. `message` is extracted
    /// from the JSON body on a best-effort basis.
    #[error("{message}")]
    Status { status: u16, message: String },
    /// The request never produced a usable response (network unreachable,
    /// timeout, TLS failure)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    /// The server answered 2xx but the body was not parseable JSON
    #[error("invalid response body: {0}")]
    InvalidBody(String),
}

impl ApiError {
    /// Whether this failure means the session's authorization has expired
    /// (401) or the server refused to process the credential (422), which
    /// triggers the refresh-or-fallback-detection logic.
    #[must_use]
    pub fn is_authorization_expired(&self) -> bool {
        matches!(self, Self::Status { status: 401 | 422, .. })
    }

    /// The HTTP status, when the server produced one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            Self::InvalidBody(_) => None,
        }
    }
}

/// OAuth providers the client can build sign-in redirects for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OAuthProvider {
    Google,
    Microsoft,
}

impl OAuthProvider {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Microsoft => "microsoft",
        }
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stateless-except-config wrapper translating named auth operations into
/// HTTP calls.
#[async_trait]
pub trait AuthTransport: Send + Sync {
    /// Authenticate with user-supplied credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server rejects the
    /// credentials.
    async fn login(&self, credentials: Value) -> Result<AuthResponse, ApiError>;

    /// Register a new account.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server rejects the
    /// registration.
    async fn signup(&self, details: Value) -> Result<AuthResponse, ApiError>;

    /// Terminate the server-side session.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails; callers treat this as
    /// best-effort.
    async fn logout(&self) -> Result<(), ApiError>;

    /// Ask the server whether the current session is authenticated.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails outright; a reachable server
    /// that says "no" is `Ok(false)`.
    async fn check_session(&self) -> Result<bool, ApiError>;

    /// Fetch the user record.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or is unauthorized.
    async fn fetch_profile(&self) -> Result<Profile, ApiError>;

    /// Update the user record, returning the server's view of it.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or is unauthorized.
    async fn update_profile(&self, changes: Value) -> Result<Profile, ApiError>;

    /// Change the account password.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the current password is
    /// rejected.
    async fn update_password(&self, current: &str, new: &str) -> Result<(), ApiError>;

    /// Exchange the refresh token for a new session.
    ///
    /// Never fails: "could not refresh" is an expected steady-state
    /// outcome, so network errors, parse errors and non-2xx responses all
    /// resolve to `false` with logging as the only side effect. Rotated
    /// tokens in the response are persisted by the transport itself when
    /// fallback storage is active.
    async fn refresh_token(&self) -> bool;

    /// Build the provider sign-in redirect URL. Pure string building, no
    /// network call.
    fn oauth_redirect_url(&self, provider: OAuthProvider, redirect_uri: Option<&str>) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_expiry_covers_401_and_422() {
        for status in [401, 422] {
            let err = ApiError::Status {
                status,
                message: "no".to_string(),
            };
            assert!(err.is_authorization_expired(), "status {status}");
        }
        for status in [400, 403, 404, 500] {
            let err = ApiError::Status {
                status,
                message: "no".to_string(),
            };
            assert!(!err.is_authorization_expired(), "status {status}");
        }
    }

    #[test]
    fn status_accessor_reports_server_status() {
        let err = ApiError::Status {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert_eq!(err.status(), Some(503));
        assert_eq!(ApiError::InvalidBody("x".to_string()).status(), None);
    }

    #[test]
    fn provider_names_are_stable() {
        assert_eq!(OAuthProvider::Google.as_str(), "google");
        assert_eq!(OAuthProvider::Microsoft.to_string(), "microsoft");
    }
}
