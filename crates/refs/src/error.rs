//! Reference Store Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A reference store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for reference store operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The preference store could not be read or written.
    #[display("preference store error")]
    Preferences,
    /// A value could not be encoded for storage.
    #[display("could not serialize {_0}")]
    Serialize(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Preferences)
    }
}
