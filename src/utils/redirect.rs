//! Redirect URI validation for OAuth sign-in URLs
//!
//! The `redirect_uri` appended to provider sign-in URLs is attacker-visible
//! input in many applications, so it is validated against open-redirect
//! attacks: only relative paths and absolute URLs on the configured
//! application origin survive; anything else falls back to the origin.

use once_cell::sync::Lazy;
use regex::Regex;

// Core path traversal pattern - the most common and critical attack
static PATH_TRAVERSAL_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\.\.").unwrap());

// Control characters and encoded variants that never appear in legitimate
// redirect targets
static SUSPICIOUS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[\x00-\x1F\x7F-\x9F]|%(?:00|0[aAdD]|09|5c)|\\").unwrap()
});

/// Resolve the redirect target for an OAuth sign-in URL.
///
/// `None` or an invalid candidate resolves to the application origin;
/// a valid relative path is made absolute against the origin; a valid
/// same-origin absolute URL passes through unchanged.
#[must_use]
pub fn sanitize_redirect_uri(candidate: Option<&str>, origin: &str) -> String {
    let origin = origin.trim_end_matches('/');
    match candidate {
        None => origin.to_string(),
        Some(raw) if is_relative_url(raw) && is_clean(raw) => format!("{origin}{raw}"),
        Some(raw) if is_clean(raw) && is_same_origin(raw, origin) => raw.to_string(),
        Some(raw) => {
            log::warn!("Rejecting redirect target '{raw}', falling back to application origin");
            origin.to_string()
        }
    }
}

/// Check if URL is relative (starts with /, not //, and has no scheme)
fn is_relative_url(url: &str) -> bool {
    url.starts_with('/') && !url.starts_with("//") && !url.contains(':')
}

fn is_clean(url: &str) -> bool {
    if url.len() > 2048 {
        return false;
    }
    if PATH_TRAVERSAL_PATTERN.is_match(url) || SUSPICIOUS_PATTERN.is_match(url) {
        return false;
    }
    // check decoded variants for encoded attacks
    if let Ok(decoded) = urlencoding::decode(url) {
        if PATH_TRAVERSAL_PATTERN.is_match(&decoded) || SUSPICIOUS_PATTERN.is_match(&decoded) {
            return false;
        }
    }
    true
}

fn is_same_origin(candidate: &str, origin: &str) -> bool {
    let (Ok(candidate), Ok(origin)) = (url::Url::parse(candidate), url::Url::parse(origin)) else {
        return false;
    };
    if candidate.scheme() != "http" && candidate.scheme() != "https" {
        return false;
    }
    candidate.scheme() == origin.scheme()
        && candidate.host_str() == origin.host_str()
        && candidate.port_or_known_default() == origin.port_or_known_default()
}
