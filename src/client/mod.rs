//! Auth API client
//!
//! This module translates named auth operations into HTTP calls:
//!
//! - [`transport`] - The [`AuthTransport`] seam the engine depends on
//! - [`http`] - The reqwest-backed implementation

pub mod http;
pub mod transport;

pub use http::HttpAuthClient;
pub use transport::{ApiError, AuthTransport, OAuthProvider};
