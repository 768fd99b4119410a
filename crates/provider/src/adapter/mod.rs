//! Provider adapter trait and implementations.
//!
//! This module defines the [`ProviderAdapter`] trait, which provides a unified
//! interface for remote file operations across providers (Dropbox, WebDAV,
//! and an in-memory mock for tests).

#[cfg(feature = "dropbox")]
mod dropbox;
#[cfg(feature = "http")]
mod http;
#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "webdav")]
mod webdav;

#[cfg(feature = "dropbox")]
pub use self::dropbox::DropboxAdapter;
#[cfg(feature = "mock")]
pub use self::mock::MockProvider;
#[cfg(feature = "webdav")]
pub use self::webdav::WebDavAdapter;
use crate::auth::Authorizer;
use crate::decide::{Decision, decide};
use crate::error::{ErrorKind, Result};
use crate::hash::content_hash;
use crate::models::{Baseline, ListPage, Provider, RemoteFile, RevisionKind, UploadMode};
use async_trait::async_trait;

/// Outcome of [`ProviderAdapter::sync_file`], seen from the provider's side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncResult {
    /// Nothing was transferred. Carries fresh metadata when both sides
    /// changed to identical content and the stored revision should be
    /// refreshed.
    Unchanged(Option<RemoteFile>),
    /// Local content was uploaded (local wins).
    Uploaded(RemoteFile),
    /// Remote content was downloaded (server wins). The caller is responsible
    /// for writing `content` locally.
    Downloaded { remote: RemoteFile, content: String },
    /// Both sides changed since the baseline. Nothing was transferred.
    Conflict(RemoteFile),
}

/// Unified interface for remote storage providers.
///
/// All paths are absolute remote paths (see
/// [`normalize_path`](crate::normalize_path)). Every provider-specific
/// failure is classified into [`ErrorKind`] before it is returned, so callers
/// can react to [`Unauthorized`](ErrorKind::Unauthorized) or
/// [`NotFound`](ErrorKind::NotFound) without knowing which provider they are
/// talking to.
///
/// # Examples
///
/// ```
/// use todosync_provider::{ProviderAdapter, UploadMode, error::Result};
///
/// async fn publish(adapter: &dyn ProviderAdapter, content: &str) -> Result<String> {
///     let uploaded = adapter.upload_file("/todo.txt", content, UploadMode::Update).await?;
///     Ok(uploaded.revision)
/// }
/// ```
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// How this provider's revision strings compare.
    fn revision_kind(&self) -> RevisionKind;

    /// Run the provider's login handshake, asking `authorizer` for whatever
    /// needs a human.
    ///
    /// Idempotent: returns immediately when the stored credentials already
    /// produce a working client.
    async fn authenticate(&self, authorizer: &dyn Authorizer) -> Result<()>;

    /// Build (or reuse) the cached client from stored credentials.
    ///
    /// Returns [`Unauthorized`](ErrorKind::Unauthorized) when there are no
    /// usable credentials.
    async fn create_client(&self) -> Result<()>;

    /// Whether credentials for this provider are stored at all. Doesn't
    /// verify them.
    async fn has_credentials(&self) -> Result<bool>;

    /// Revoke (where supported) and forget stored credentials, and drop the
    /// cached client.
    async fn sign_out(&self) -> Result<()>;

    /// List the entries below `path`, one page at a time.
    ///
    /// Pass the previous page's `cursor` to continue a listing. Entries that
    /// are neither files nor folders are omitted.
    async fn list_files(&self, path: &str, cursor: Option<&str>) -> Result<ListPage>;

    /// Fetch metadata for a single file.
    ///
    /// Returns [`NotFound`](ErrorKind::NotFound) if it doesn't exist.
    async fn get_metadata(&self, path: &str) -> Result<RemoteFile>;

    async fn download_file(&self, path: &str) -> Result<String>;

    /// Upload `content` and return the file's fresh metadata.
    ///
    /// With [`UploadMode::Create`] an existing file at `path` is never
    /// touched and [`Conflict`](ErrorKind::Conflict) is returned instead.
    async fn upload_file(&self, path: &str, content: &str, mode: UploadMode) -> Result<RemoteFile>;

    /// Returns [`NotFound`](ErrorKind::NotFound) if the file doesn't exist.
    async fn delete_file(&self, path: &str) -> Result<()>;

    /// Compare `content` against the `base` it was last synced at and the
    /// server's current metadata, then transfer in whichever direction is
    /// safe.
    ///
    /// - Remote file missing: re-create it from `content`.
    /// - Only local changed: upload.
    /// - Only remote changed: download.
    /// - Both changed: [`SyncResult::Conflict`], nothing transferred.
    async fn sync_file(&self, base: &Baseline, content: &str) -> Result<SyncResult> {
        let local_hash = content_hash(content.as_bytes());
        let remote = match self.get_metadata(&base.path).await {
            Ok(remote) => remote,
            Err(err) if matches!(&*err, ErrorKind::NotFound(_)) => {
                tracing::info!(provider = %self.provider(), path = %base.path, "remote file missing, re-creating");
                let uploaded = self.upload_file(&base.path, content, UploadMode::Create).await?;
                return Ok(SyncResult::Uploaded(uploaded));
            },
            Err(err) => return Err(err),
        };
        let decision = decide(self.revision_kind(), base, &local_hash, &remote);
        tracing::debug!(
            provider = %self.provider(),
            path = %base.path,
            local_revision = %base.revision,
            server_revision = %remote.revision,
            ?decision,
            "compared file against server",
        );
        match decision {
            Decision::NoAction => Ok(SyncResult::Unchanged(None)),
            Decision::Converged => Ok(SyncResult::Unchanged(Some(remote))),
            Decision::Push => {
                let uploaded = self.upload_file(&base.path, content, UploadMode::Update).await?;
                Ok(SyncResult::Uploaded(uploaded))
            },
            Decision::Pull => {
                let content = self.download_file(&remote.path).await?;
                Ok(SyncResult::Downloaded { remote, content })
            },
            Decision::Conflict => Ok(SyncResult::Conflict(remote)),
        }
    }
}
