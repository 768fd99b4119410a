//! Provider models.
//!
//! These types describe remote files as reported by a provider, plus the small
//! enums that steer uploads and revision comparison.

use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use time::UtcDateTime;

/// A supported remote storage provider.
///
/// Serialized with the same casing the persisted reference tables have always
/// used (`"Dropbox"`, `"WebDAV"`).
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Provider {
    #[display("Dropbox")]
    Dropbox,
    #[display("WebDAV")]
    #[serde(rename = "WebDAV")]
    WebDav,
}
impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Dropbox, Provider::WebDav];
}

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
#[display("unknown provider: {_0}")]
pub struct UnknownProvider(#[error(not(source))] pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dropbox" => Ok(Self::Dropbox),
            "webdav" => Ok(Self::WebDav),
            _ => Err(UnknownProvider(s.to_string())),
        }
    }
}

/// How a provider's revision strings should be compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionKind {
    /// Opaque token, equal strings mean the same revision (Dropbox `rev`).
    Exact,
    /// A timestamp, compared as instants so that formatting differences
    /// between responses don't look like changes (WebDAV `getlastmodified`).
    Timestamp,
}

/// Upload behaviour when the remote path may already exist.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    /// Fail with [`Conflict`](crate::error::ErrorKind::Conflict) if the path
    /// is already taken. Used for first-time links.
    #[display("create")]
    Create,
    /// Overwrite whatever is there.
    #[display("update")]
    Update,
}

/// File metadata returned by providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Display name (last path segment)
    pub name: String,
    /// Absolute remote path, always starting with `/`
    pub path: String,
    /// Provider revision token, see [`RevisionKind`]
    pub revision: String,
    /// Last modified timestamp, when the provider reports one
    pub modified: Option<UtcDateTime>,
    /// Provider-computed content hash, only when it is compatible with
    /// [`content_hash`](crate::content_hash)
    pub content_hash: Option<String>,
}
impl RemoteFile {
    pub fn new(path: impl Into<String>, revision: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            name: crate::path::file_name(&path).to_string(),
            path,
            revision: revision.into(),
            modified: None,
            content_hash: None,
        }
    }

    pub fn with_modified(mut self, modified: UtcDateTime) -> Self {
        self.modified = Some(modified);
        self
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }
}

/// An entry in a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteItem {
    File(RemoteFile),
    Folder { name: String, path: String },
}
impl RemoteItem {
    pub fn path(&self) -> &str {
        match self {
            Self::File(file) => &file.path,
            Self::Folder { path, .. } => path,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::File(file) => &file.name,
            Self::Folder { name, .. } => name,
        }
    }
}

/// One page of a remote directory listing.
///
/// `cursor` is opaque: pass it back verbatim to fetch the next page while
/// `has_more` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub items: Vec<RemoteItem>,
    pub cursor: Option<String>,
    pub has_more: bool,
}

/// The last state both sides agreed on for a linked file: where it lives
/// remotely, which revision was last seen, and the hash of the content at
/// that point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Baseline {
    pub path: String,
    pub revision: String,
    pub content_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Provider::Dropbox, r#""Dropbox""#)]
    #[case(Provider::WebDav, r#""WebDAV""#)]
    fn test_provider_serialize(#[case] input: Provider, #[case] expected: &str) {
        assert_eq!(serde_json::to_string(&input).unwrap(), expected);
        assert_eq!(serde_json::from_str::<Provider>(expected).unwrap(), input);
    }

    #[rstest]
    #[case("dropbox", Provider::Dropbox)]
    #[case("Dropbox", Provider::Dropbox)]
    #[case("WebDAV", Provider::WebDav)]
    #[case("webdav", Provider::WebDav)]
    fn test_provider_from_str(#[case] input: &str, #[case] expected: Provider) {
        assert_eq!(input.parse::<Provider>().unwrap(), expected);
    }

    #[test]
    fn test_provider_from_str_unknown() {
        assert_eq!("gdrive".parse::<Provider>(), Err(UnknownProvider("gdrive".to_string())));
    }

    #[test]
    fn test_remote_file_name_from_path() {
        let file = RemoteFile::new("/Apps/todo/todo.txt", "1");
        assert_eq!(file.name, "todo.txt");
    }
}
