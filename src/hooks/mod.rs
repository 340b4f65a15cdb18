//! Hook points for observing and transforming in-flight auth data
//!
//! Collaborators register handlers against a closed set of [`HookPoint`]s.
//! Handlers run sequentially in registration order, each awaited before the
//! next; a handler returning `Ok(Some(payload))` replaces the payload for
//! the handlers after it. A failing handler is logged and skipped — it
//! never aborts the remaining handlers or the operation that triggered it.

use crate::client::transport::AuthTransport;
use crate::settings::KeeprsSettings;
use crate::storage::TokenStore;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// The extensibility points the engine fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    BeforeLogin,
    AfterLogin,
    LoginError,
    BeforeSignup,
    AfterSignup,
    SignupError,
    BeforeLogout,
    AfterLogout,
    LogoutError,
    BeforeTokenRefresh,
    AfterTokenRefresh,
    TokenRefreshError,
    BeforePasswordUpdate,
    AfterPasswordUpdate,
    PasswordUpdateError,
    BeforeProfileUpdate,
    AfterProfileUpdate,
    ProfileUpdateError,
    /// Fired whenever an operation observes an authorization failure
    AuthError,
    /// Applied to each fetched profile before it is stored
    TransformProfile,
}

/// Typed payload carried through a hook point.
///
/// Each point fires one payload shape; a handler that returns a different
/// shape than it received is ignored with a warning, which keeps the
/// registry extensible without giving up type safety.
#[derive(Debug, Clone, PartialEq)]
pub enum HookPayload {
    /// Login/signup request body, before the call
    Credentials(Value),
    /// Server response body, after a completed call
    Response(Value),
    /// A user record in flight (transform, profile update)
    Profile(Value),
    /// A user-facing failure message
    Error(String),
    /// Points with nothing to carry (logout, token refresh, password)
    Empty,
}

impl HookPayload {
    /// The inner JSON value, for the payload shapes that carry one.
    #[must_use]
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Credentials(value) | Self::Response(value) | Self::Profile(value) => Some(value),
            Self::Error(_) | Self::Empty => None,
        }
    }
}

/// A handler signalled failure; isolated and logged, never propagated.
#[derive(Debug, Error)]
#[error("hook handler failed: {0}")]
pub struct HookError(pub String);

/// Read-only view of the client internals handed to every handler.
#[derive(Clone)]
pub struct HookContext {
    pub settings: Arc<KeeprsSettings>,
    pub tokens: Arc<TokenStore>,
    pub transport: Arc<dyn AuthTransport>,
}

pub type HookFuture = Pin<Box<dyn Future<Output = Result<Option<HookPayload>, HookError>> + Send>>;
type HookHandler = Arc<dyn Fn(HookPayload, HookContext) -> HookFuture + Send + Sync>;

/// Registry of hook handlers, keyed by point.
#[derive(Default)]
pub struct HookRegistry {
    handlers: RwLock<HashMap<HookPoint, Vec<HookHandler>>>,
}

impl HookRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a hook point.
    ///
    /// ```
    /// # use keeprs::hooks::{HookPayload, HookPoint, HookRegistry};
    /// let hooks = HookRegistry::new();
    /// hooks.on(HookPoint::TransformProfile, |payload, _ctx| {
    ///     Box::pin(async move {
    ///         let HookPayload::Profile(mut profile) = payload else {
    ///             return Ok(None);
    ///         };
    ///         profile["display_name"] = profile["email"].clone();
    ///         Ok(Some(HookPayload::Profile(profile)))
    ///     })
    /// });
    /// ```
    pub fn on<F>(&self, point: HookPoint, handler: F)
    where
        F: Fn(HookPayload, HookContext) -> HookFuture + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .unwrap()
            .entry(point)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Fire a hook point, threading the payload through each handler in
    /// registration order. Returns the final payload.
    pub async fn trigger(
        &self,
        point: HookPoint,
        payload: HookPayload,
        ctx: &HookContext,
    ) -> HookPayload {
        // Snapshot the handler list so no lock is held across awaits
        let handlers: Vec<HookHandler> = self
            .handlers
            .read()
            .unwrap()
            .get(&point)
            .cloned()
            .unwrap_or_default();

        let mut current = payload;
        for handler in handlers {
            match handler(current.clone(), ctx.clone()).await {
                Ok(Some(next)) => {
                    if std::mem::discriminant(&next) == std::mem::discriminant(&current) {
                        current = next;
                    } else {
                        log::warn!(
                            "Handler for {point:?} returned a mismatched payload shape, ignoring"
                        );
                    }
                }
                Ok(None) => {}
                Err(e) => log::warn!("Handler for {point:?} failed: {e}"),
            }
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use serde_json::json;

    fn context() -> HookContext {
        HookContext {
            settings: Arc::new(
                KeeprsSettings::builder("https://api.example.com")
                    .build()
                    .unwrap(),
            ),
            tokens: Arc::new(TokenStore::in_memory()),
            transport: Arc::new(MockTransport::new()),
        }
    }

    #[tokio::test]
    async fn handlers_run_in_registration_order() {
        let hooks = HookRegistry::new();
        hooks.on(HookPoint::TransformProfile, |payload, _ctx| {
            Box::pin(async move {
                let HookPayload::Profile(mut p) = payload else {
                    return Ok(None);
                };
                p["order"] = json!("first");
                Ok(Some(HookPayload::Profile(p)))
            })
        });
        hooks.on(HookPoint::TransformProfile, |payload, _ctx| {
            Box::pin(async move {
                let HookPayload::Profile(mut p) = payload else {
                    return Ok(None);
                };
                p["order"] = json!("second");
                Ok(Some(HookPayload::Profile(p)))
            })
        });

        let result = hooks
            .trigger(
                HookPoint::TransformProfile,
                HookPayload::Profile(json!({})),
                &context(),
            )
            .await;
        assert_eq!(result, HookPayload::Profile(json!({"order": "second"})));
    }

    #[tokio::test]
    async fn returning_none_keeps_previous_transformation() {
        let hooks = HookRegistry::new();
        hooks.on(HookPoint::TransformProfile, |payload, _ctx| {
            Box::pin(async move {
                let HookPayload::Profile(mut p) = payload else {
                    return Ok(None);
                };
                p["tag"] = json!("kept");
                Ok(Some(HookPayload::Profile(p)))
            })
        });
        hooks.on(HookPoint::TransformProfile, |_payload, _ctx| {
            Box::pin(async move { Ok(None) })
        });

        let result = hooks
            .trigger(
                HookPoint::TransformProfile,
                HookPayload::Profile(json!({})),
                &context(),
            )
            .await;
        assert_eq!(result, HookPayload::Profile(json!({"tag": "kept"})));
    }

    #[tokio::test]
    async fn failing_handler_does_not_abort_the_chain() {
        let hooks = HookRegistry::new();
        hooks.on(HookPoint::BeforeLogin, |_payload, _ctx| {
            Box::pin(async move { Err(HookError("boom".to_string())) })
        });
        hooks.on(HookPoint::BeforeLogin, |payload, _ctx| {
            Box::pin(async move {
                let HookPayload::Credentials(mut c) = payload else {
                    return Ok(None);
                };
                c["survived"] = json!(true);
                Ok(Some(HookPayload::Credentials(c)))
            })
        });

        let result = hooks
            .trigger(
                HookPoint::BeforeLogin,
                HookPayload::Credentials(json!({})),
                &context(),
            )
            .await;
        assert_eq!(result, HookPayload::Credentials(json!({"survived": true})));
    }

    #[tokio::test]
    async fn mismatched_payload_shape_is_ignored() {
        let hooks = HookRegistry::new();
        hooks.on(HookPoint::TransformProfile, |_payload, _ctx| {
            Box::pin(async move { Ok(Some(HookPayload::Error("wrong shape".to_string()))) })
        });

        let original = HookPayload::Profile(json!({"id": 1}));
        let result = hooks
            .trigger(HookPoint::TransformProfile, original.clone(), &context())
            .await;
        assert_eq!(result, original);
    }

    #[tokio::test]
    async fn unregistered_point_returns_payload_unchanged() {
        let hooks = HookRegistry::new();
        let result = hooks
            .trigger(HookPoint::AfterLogout, HookPayload::Empty, &context())
            .await;
        assert_eq!(result, HookPayload::Empty);
    }
}
