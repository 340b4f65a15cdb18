//! Shared utilities

pub mod redirect;

pub use redirect::sanitize_redirect_uri;
