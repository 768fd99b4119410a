//! Configuration Error Types

use derive_more::{Display, Error};

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// No home directory to derive the default locations from.
    #[display("could not determine the user's home directory")]
    NoHomeDirectory,
    /// The file extension doesn't name a supported format.
    #[display("unsupported configuration format: {_0}")]
    UnsupportedFormat(#[error(not(source))] String),
    /// A configuration source could not be read or merged.
    #[display("could not load configuration")]
    Load,
    /// The merged configuration is not usable.
    #[display("invalid configuration: {_0}")]
    Invalid(#[error(not(source))] String),
}
