//! Reference table rows.
//!
//! Field names and casing match what has always been persisted under the
//! `cloud-file-refs` / `cloud-done-file-refs` keys.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use todosync_provider::{Baseline, Provider, RemoteFile};

/// Link between a local file and its remote copy.
///
/// Exists if and only if the local file is linked; at most one per local
/// path, and a `(provider, path)` pair is never linked twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    /// Remote display name
    pub name: String,
    /// Remote path
    pub path: String,
    /// Provider revision at the last successful sync
    pub revision: String,
    /// Content hash at the last successful sync
    pub content_hash: String,
    /// Local identity, the table's primary key
    pub local_file_path: PathBuf,
    #[serde(with = "time::serde::rfc3339")]
    pub last_sync: OffsetDateTime,
    pub provider: Provider,
}
impl FileRef {
    /// Ref for a file that was just transferred as `remote`, with local
    /// content hashing to `content_hash`.
    pub fn new(local: impl Into<PathBuf>, provider: Provider, remote: &RemoteFile, content_hash: impl Into<String>) -> Self {
        Self {
            name: remote.name.clone(),
            path: remote.path.clone(),
            revision: remote.revision.clone(),
            content_hash: content_hash.into(),
            local_file_path: local.into(),
            last_sync: OffsetDateTime::now_utc(),
            provider,
        }
    }

    pub fn baseline(&self) -> Baseline {
        Baseline {
            path: self.path.clone(),
            revision: self.revision.clone(),
            content_hash: self.content_hash.clone(),
        }
    }

    pub fn local_path(&self) -> &Path {
        &self.local_file_path
    }
}

/// Link between a primary file and the remote copy of its done (archive)
/// file. Keyed by the *primary* file's local path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoneFileRef {
    pub name: String,
    pub path: String,
    pub revision: String,
    pub content_hash: String,
    /// Local path of the primary file this done file belongs to
    pub local_file_path: PathBuf,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_sync: Option<OffsetDateTime>,
    pub provider: Provider,
}
impl DoneFileRef {
    pub fn new(primary: impl Into<PathBuf>, provider: Provider, remote: &RemoteFile, content_hash: impl Into<String>) -> Self {
        Self {
            name: remote.name.clone(),
            path: remote.path.clone(),
            revision: remote.revision.clone(),
            content_hash: content_hash.into(),
            local_file_path: primary.into(),
            last_sync: Some(OffsetDateTime::now_utc()),
            provider,
        }
    }

    pub fn baseline(&self) -> Baseline {
        Baseline {
            path: self.path.clone(),
            revision: self.revision.clone(),
            content_hash: self.content_hash.clone(),
        }
    }

    pub fn primary_path(&self) -> &Path {
        &self.local_file_path
    }
}
