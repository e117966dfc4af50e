//! Host header validation.
//!
//! Requests whose `Host` is not on the allow-list are answered with
//! 400 before reaching any handler.

use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::auth::AppState;

/// Parsed `ALLOWED_HOSTS` list.
///
/// `*` allows everything. A pattern with a leading dot (`.example.com`)
/// matches the domain itself and every subdomain. Anything else must match
/// exactly, ignoring case and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedHosts {
    patterns: Vec<String>,
}

impl AllowedHosts {
    /// Parses a comma separated list.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        Self {
            patterns: raw
                .split(',')
                .map(|p| p.trim().to_ascii_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Allows any host.
    #[must_use]
    pub fn any() -> Self {
        Self::parse("*")
    }

    #[must_use]
    pub fn allows(&self, host: &str) -> bool {
        if self.patterns.iter().any(|p| p == "*") {
            return true;
        }
        let domain = strip_port(host).trim_end_matches('.').to_ascii_lowercase();
        if domain.is_empty() {
            return false;
        }
        self.patterns.iter().any(|pattern| {
            match pattern.strip_prefix('.') {
                Some(parent) => domain == parent || domain.ends_with(pattern.as_str()),
                None => domain == *pattern,
            }
        })
    }
}

fn strip_port(host: &str) -> &str {
    if host.ends_with(']') {
        return host;
    }
    match host.rsplit_once(':') {
        Some((domain, _port)) => domain,
        None => host,
    }
}

/// Rejects requests for hosts that are not allowed.
pub async fn enforce_allowed_hosts(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| request.uri().host())
        .unwrap_or_default()
        .to_string();

    if state.allowed_hosts.allows(&host) {
        next.run(request).await
    } else {
        tracing::warn!(host = %host, "rejected request for disallowed host");
        (StatusCode::BAD_REQUEST, "Bad Request (400)").into_response()
    }
}
