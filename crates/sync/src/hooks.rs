//! Decision points and notifications supplied by the front end.

use crate::error::ErrorKind;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use todosync_provider::{Provider, RemoteFile};

/// Both the local file and the remote copy changed since the last sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub local_path: PathBuf,
    pub provider: Provider,
    pub remote: RemoteFile,
    pub local_content: String,
}

/// Which side of a [`Conflict`] survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    KeepLocal,
    KeepRemote,
}

/// Asks a human which side of a conflict wins.
#[async_trait]
pub trait ConflictResolver: Send + Sync {
    /// `None` means the prompt was dismissed; nothing is changed and the
    /// conflict is reported again on the next sync.
    async fn resolve(&self, conflict: &Conflict) -> Option<Resolution>;
}

/// Leaves every conflict unresolved.
#[derive(Debug, Clone, Copy, Default)]
pub struct DismissConflicts;

#[async_trait]
impl ConflictResolver for DismissConflicts {
    async fn resolve(&self, conflict: &Conflict) -> Option<Resolution> {
        tracing::warn!(path = %conflict.local_path.display(), remote = %conflict.remote.path, "conflict left unresolved");
        None
    }
}

/// User-facing notifications raised by the engine.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Raised at most once per provider until it is authenticated again.
    async fn session_expired(&self, provider: Provider);
    async fn sync_failed(&self, path: &Path, error: &ErrorKind);
    /// Archiving was switched on because a done file was found remotely.
    async fn archive_enabled(&self);
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn session_expired(&self, provider: Provider) {
        tracing::warn!(%provider, "session expired, sign in again");
    }

    async fn sync_failed(&self, path: &Path, error: &ErrorKind) {
        tracing::error!(path = %path.display(), %error, "sync failed");
    }

    async fn archive_enabled(&self) {
        tracing::info!("task archiving was turned on because a done file was found");
    }
}
