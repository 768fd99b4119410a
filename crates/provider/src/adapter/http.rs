//! Shared HTTP error classification for the network-backed adapters.

use crate::error::{Error, ErrorKind, Result};
use crate::models::Provider;
use exn::ResultExt;
use reqwest::StatusCode;
use std::time::Duration;

pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound for a whole request, body included.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP client for an adapter. Requests to an unreachable or silent server
/// fail with [`Network`](ErrorKind::Network) once a timeout passes.
pub(crate) fn http_client(connect: Duration, request: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(connect)
        .timeout(request)
        .build()
        .or_raise(|| ErrorKind::Backend("could not build HTTP client".to_string()))
}

/// Map a non-success HTTP status to an actionable error kind.
pub(crate) fn classify_status(provider: Provider, status: StatusCode, path: &str, body: &str) -> ErrorKind {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorKind::Unauthorized(provider),
        StatusCode::NOT_FOUND => ErrorKind::NotFound(path.to_string()),
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => ErrorKind::Conflict(path.to_string()),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ErrorKind::Network(status.to_string()),
        _ => {
            let body = body.trim();
            match body.is_empty() {
                true => ErrorKind::Backend(status.to_string()),
                false => ErrorKind::Backend(format!("{status}: {}", truncate(body, 200))),
            }
        },
    }
}

/// Classify a transport-level failure (the request never got a response).
pub(crate) fn transport(err: reqwest::Error) -> Error {
    let kind = match err.is_timeout() || err.is_connect() {
        true => ErrorKind::Network(err.to_string()),
        false => ErrorKind::Backend(err.to_string()),
    };
    exn::Exn::from(err).raise(kind)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
