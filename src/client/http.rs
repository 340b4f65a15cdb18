//! reqwest-backed implementation of the auth transport
//!
//! Every request carries the JSON content type, the configured custom
//! headers, and a cookie store (the "include credentials" contract —
//! cookies are sent automatically regardless of storage mode). A bearer
//! header is attached only when the operation requires auth and fallback
//! storage is active.

use crate::client::transport::{ApiError, AuthTransport, OAuthProvider};
use crate::models::{AuthResponse, Profile};
use crate::settings::KeeprsSettings;
use crate::storage::TokenStore;
use crate::utils::redirect::sanitize_redirect_uri;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// HTTP client for the remote auth API.
pub struct HttpAuthClient {
    http: reqwest::Client,
    settings: Arc<KeeprsSettings>,
    tokens: Arc<TokenStore>,
}

impl HttpAuthClient {
    /// Build the client with the configured timeout, custom headers and an
    /// enabled cookie store.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be
    /// constructed (e.g. TLS backend initialization failure).
    pub fn new(settings: Arc<KeeprsSettings>, tokens: Arc<TokenStore>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.api.request_timeout_secs))
            .cookie_store(true)
            .default_headers(Self::static_headers(&settings))
            .build()?;
        Ok(Self {
            http,
            settings,
            tokens,
        })
    }

    fn static_headers(settings: &KeeprsSettings) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in &settings.api.custom_headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => log::warn!("Skipping invalid custom header '{name}'"),
            }
        }
        headers
    }

    /// The bearer token for an authenticated request, when fallback
    /// storage decides token mode.
    fn auth_bearer(&self) -> Option<String> {
        if self
            .tokens
            .should_use_fallback(self.settings.session.storage_strategy)
        {
            self.tokens.access_token()
        } else {
            None
        }
    }

    /// Issue a request and parse the JSON body. An empty 2xx body is
    /// treated as an empty object so bodiless endpoints (logout, password
    /// update) parse uniformly.
    async fn execute(
        &self,
        method: Method,
        endpoint_path: &str,
        body: Option<&Value>,
        requires_auth: bool,
    ) -> Result<Value, ApiError> {
        let url = self.settings.api.url_for(endpoint_path);
        log::debug!("{method} {url}");

        let mut request = self.http.request(method, &url);
        if requires_auth {
            if let Some(token) = self.auth_bearer() {
                request = request.bearer_auth(token);
            }
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(Self::status_error(status, &text));
        }
        Self::parse_body(&text)
    }

    fn parse_body(text: &str) -> Result<Value, ApiError> {
        if text.trim().is_empty() {
            return Ok(json!({}));
        }
        serde_json::from_str(text).map_err(|e| ApiError::InvalidBody(e.to_string()))
    }

    /// Translate a non-2xx response into a typed failure, extracting a
    /// message from `message` or `error` fields when the body is JSON.
    fn status_error(status: StatusCode, body: &str) -> ApiError {
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|body| {
                body.get("message")
                    .or_else(|| body.get("error"))
                    .and_then(Value::as_str)
                    .map(ToString::to_string)
            })
            .unwrap_or_else(|| format!("Request failed: {}", status.as_u16()));
        ApiError::Status {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl AuthTransport for HttpAuthClient {
    async fn login(&self, credentials: Value) -> Result<AuthResponse, ApiError> {
        let body = self
            .execute(
                Method::POST,
                &self.settings.api.endpoints.login,
                Some(&credentials),
                false,
            )
            .await?;
        Ok(AuthResponse::from_body(body))
    }

    async fn signup(&self, details: Value) -> Result<AuthResponse, ApiError> {
        let body = self
            .execute(
                Method::POST,
                &self.settings.api.endpoints.signup,
                Some(&details),
                false,
            )
            .await?;
        Ok(AuthResponse::from_body(body))
    }

    async fn logout(&self) -> Result<(), ApiError> {
        self.execute(
            Method::POST,
            &self.settings.api.endpoints.logout,
            None,
            true,
        )
        .await?;
        Ok(())
    }

    async fn check_session(&self) -> Result<bool, ApiError> {
        let body = self
            .execute(
                Method::GET,
                &self.settings.api.endpoints.check_session,
                None,
                true,
            )
            .await?;
        Ok(body
            .get("authenticated")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    async fn fetch_profile(&self) -> Result<Profile, ApiError> {
        self.execute(
            Method::GET,
            &self.settings.api.endpoints.profile,
            None,
            true,
        )
        .await
    }

    async fn update_profile(&self, changes: Value) -> Result<Profile, ApiError> {
        self.execute(
            Method::PUT,
            &self.settings.api.endpoints.profile,
            Some(&changes),
            true,
        )
        .await
    }

    async fn update_password(&self, current: &str, new: &str) -> Result<(), ApiError> {
        let body = json!({
            "current_password": current,
            "new_password": new,
        });
        self.execute(
            Method::POST,
            &self.settings.api.endpoints.password_update,
            Some(&body),
            true,
        )
        .await?;
        Ok(())
    }

    /// The refresh operation bypasses the generic requires-auth path: on a
    /// fresh session there may be no access token yet, so the *refresh*
    /// token is the bearer when fallback storage is active.
    async fn refresh_token(&self) -> bool {
        let url = self
            .settings
            .api
            .url_for(&self.settings.api.endpoints.refresh);
        log::debug!("POST {url} (token refresh)");

        let fallback = self
            .tokens
            .should_use_fallback(self.settings.session.storage_strategy);

        let mut request = self.http.post(&url);
        if fallback {
            if let Some(refresh) = self.tokens.refresh_token() {
                request = request.bearer_auth(refresh);
            }
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                log::debug!("Token refresh request failed: {e}");
                return false;
            }
        };
        if !response.status().is_success() {
            log::debug!("Token refresh rejected with status {}", response.status());
            return false;
        }

        // Persist rotated tokens when running in fallback mode
        if fallback {
            match response.json::<Value>().await {
                Ok(body) => {
                    if let Some(pair) = AuthResponse::from_body(body).tokens {
                        self.tokens.set_tokens(&pair);
                    }
                }
                Err(e) => log::debug!("Ignoring unparseable refresh response body: {e}"),
            }
        }
        true
    }

    fn oauth_redirect_url(&self, provider: OAuthProvider, redirect_uri: Option<&str>) -> String {
        let path = match provider {
            OAuthProvider::Google => &self.settings.api.endpoints.oauth_google,
            OAuthProvider::Microsoft => &self.settings.api.endpoints.oauth_microsoft,
        };
        let target = sanitize_redirect_uri(redirect_uri, &self.settings.application.origin);
        format!(
            "{}?redirect_uri={}",
            self.settings.api.url_for(path),
            urlencoding::encode(&target)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> HttpAuthClient {
        let settings = Arc::new(
            KeeprsSettings::builder("https://api.example.com")
                .app_origin("https://app.example.com")
                .build()
                .unwrap(),
        );
        let tokens = Arc::new(TokenStore::in_memory());
        HttpAuthClient::new(settings, tokens).unwrap()
    }

    #[test]
    fn status_error_extracts_message_field() {
        let err = HttpAuthClient::status_error(
            StatusCode::UNAUTHORIZED,
            r#"{"message": "Session expired"}"#,
        );
        assert_eq!(err.to_string(), "Session expired");
        assert!(err.is_authorization_expired());
    }

    #[test]
    fn status_error_falls_back_to_error_field() {
        let err =
            HttpAuthClient::status_error(StatusCode::BAD_REQUEST, r#"{"error": "bad input"}"#);
        assert_eq!(err.to_string(), "bad input");
    }

    #[test]
    fn status_error_generic_message_for_unparseable_body() {
        let err = HttpAuthClient::status_error(StatusCode::BAD_GATEWAY, "<html>oops</html>");
        assert_eq!(err.to_string(), "Request failed: 502");

        let err = HttpAuthClient::status_error(StatusCode::INTERNAL_SERVER_ERROR, r#"{"ok":1}"#);
        assert_eq!(err.to_string(), "Request failed: 500");
    }

    #[test]
    fn parse_body_treats_empty_as_object() {
        assert_eq!(HttpAuthClient::parse_body("").unwrap(), json!({}));
        assert_eq!(HttpAuthClient::parse_body("  \n").unwrap(), json!({}));
        assert!(HttpAuthClient::parse_body("not json").is_err());
    }

    #[test]
    fn oauth_url_appends_encoded_redirect() {
        let client = client();
        let url = client.oauth_redirect_url(OAuthProvider::Google, Some("/dashboard"));
        assert_eq!(
            url,
            "https://api.example.com/api/auth/login/google?redirect_uri=https%3A%2F%2Fapp.example.com%2Fdashboard"
        );
    }

    #[test]
    fn oauth_url_defaults_to_application_origin() {
        let client = client();
        let url = client.oauth_redirect_url(OAuthProvider::Microsoft, None);
        assert_eq!(
            url,
            "https://api.example.com/api/auth/login/microsoft?redirect_uri=https%3A%2F%2Fapp.example.com"
        );
    }

    #[test]
    fn bearer_absent_when_cookies_are_trusted() {
        let client = client();
        assert!(client.auth_bearer().is_none());

        client
            .tokens
            .set_tokens(&crate::models::CredentialPair::new("a", "b"));
        assert_eq!(client.auth_bearer().unwrap(), "a");
    }
}
