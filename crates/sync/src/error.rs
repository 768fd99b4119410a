//! Sync Error Types
//!
//! Every failure is classified into one of these kinds before it reaches a
//! caller, whichever provider or local subsystem it came from.

use derive_more::{Display, Error};
use std::path::PathBuf;
use todosync_provider::Provider;
use todosync_provider::error::{ErrorKind as ProviderErrorKind, Result as ProviderResult};

/// A sync error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The provider session expired or was never established.
    #[display("not signed in to {_0}")]
    Unauthorized(#[error(not(source))] Provider),
    /// Remote file does not exist
    #[display("remote file not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Remote file already exists, or a precondition failed.
    #[display("remote conflict: {_0}")]
    Conflict(#[error(not(source))] String),
    /// Provider unreachable. Retried on the next trigger, never reported to
    /// the user.
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// Any other provider failure.
    #[display("provider error: {_0}")]
    Provider(#[error(not(source))] String),
    /// No reference exists for this local file.
    #[display("file is not linked: {}", _0.display())]
    NotLinked(#[error(not(source))] PathBuf),
    /// No adapter is registered for the provider.
    #[display("{_0} is not available")]
    Unavailable(#[error(not(source))] Provider),
    /// Reading or writing the reference tables failed.
    #[display("reference store error")]
    Refs,
    /// Reading or writing a local file failed.
    #[display("local file error: {}", _0.display())]
    Local(#[error(not(source))] PathBuf),
    /// Upgrading legacy reference tables failed.
    #[display("reference migration failed")]
    Migration,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Provider(_))
    }

    pub(crate) fn from_provider(kind: &ProviderErrorKind, provider: Provider) -> Self {
        match kind {
            ProviderErrorKind::Unauthorized(provider) => Self::Unauthorized(*provider),
            ProviderErrorKind::NotFound(path) => Self::NotFound(path.clone()),
            ProviderErrorKind::Conflict(path) => Self::Conflict(path.clone()),
            ProviderErrorKind::Network(message) => Self::Network(message.clone()),
            other => Self::Provider(format!("{provider}: {other}")),
        }
    }
}

/// Lift a provider result into the sync error taxonomy, keeping the
/// provider error as the cause.
pub(crate) trait ProviderResultExt<T> {
    fn classify(self, provider: Provider) -> Result<T>;
}

impl<T> ProviderResultExt<T> for ProviderResult<T> {
    fn classify(self, provider: Provider) -> Result<T> {
        self.map_err(|err| {
            let kind = ErrorKind::from_provider(&err, provider);
            err.raise(kind)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ProviderErrorKind::Unauthorized(Provider::Dropbox), ErrorKind::Unauthorized(Provider::Dropbox))]
    #[case(ProviderErrorKind::NotFound("/a".into()), ErrorKind::NotFound("/a".into()))]
    #[case(ProviderErrorKind::Conflict("/a".into()), ErrorKind::Conflict("/a".into()))]
    #[case(ProviderErrorKind::Network("offline".into()), ErrorKind::Network("offline".into()))]
    #[case(ProviderErrorKind::Backend("500".into()), ErrorKind::Provider("WebDAV: provider error: 500".into()))]
    fn test_from_provider(#[case] input: ProviderErrorKind, #[case] expected: ErrorKind) {
        assert_eq!(ErrorKind::from_provider(&input, Provider::WebDav), expected);
    }

    #[test]
    fn test_classify_keeps_kind() {
        let result: ProviderResult<()> = Err(exn::Exn::from(ProviderErrorKind::NotFound("/todo.txt".into())));
        let err = result.classify(Provider::Dropbox).unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(path) if path == "/todo.txt"));
    }

    #[rstest]
    #[case(ErrorKind::Network("x".into()), true)]
    #[case(ErrorKind::Provider("x".into()), true)]
    #[case(ErrorKind::Unauthorized(Provider::Dropbox), false)]
    #[case(ErrorKind::Refs, false)]
    fn test_is_retryable(#[case] kind: ErrorKind, #[case] expected: bool) {
        assert_eq!(kind.is_retryable(), expected);
    }
}
