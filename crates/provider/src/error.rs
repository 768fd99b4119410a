//! Provider Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Every provider-specific failure
//! (HTTP status, Dropbox error summary, WebDAV multistatus) is classified into
//! one of these kinds before it leaves an adapter.

use crate::models::Provider;
use derive_more::{Display, Error};

/// A provider error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for provider operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Stored credentials are missing, expired or were revoked. The user has
    /// to go through [`authenticate`](crate::ProviderAdapter::authenticate)
    /// again.
    #[display("not authorized with {_0}")]
    Unauthorized(#[error(not(source))] Provider),
    /// Remote file does not exist
    #[display("remote file not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Remote file already exists (create-only upload) or a precondition
    /// failed.
    #[display("remote file already exists: {_0}")]
    Conflict(#[error(not(source))] String),
    /// Could not reach the provider (offline, DNS, timeout).
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// Remote path contains invalid characters or escapes the root
    #[display("invalid remote path: {_0}")]
    InvalidPath(#[error(not(source))] String),
    /// Reading or writing the credential store failed.
    #[display("credential store error")]
    Credentials,
    /// The interactive authorization step was cancelled or failed.
    #[display("authorization failed: {_0}")]
    Authorization(#[error(not(source))] String),
    /// Provider-specific error that doesn't fit any other category.
    #[display("provider error: {_0}")]
    Backend(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Backend(_))
    }
}
