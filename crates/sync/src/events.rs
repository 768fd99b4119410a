use crate::engine::{SyncEngine, SyncOutcome};
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::path::{Path, PathBuf};

/// A change to a local file, as reported by a file watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    Created(PathBuf),
    Updated(PathBuf),
    Deleted(PathBuf),
}

impl SyncEngine {
    /// React to a local file change. Returns the sync outcome when the change
    /// caused a sync.
    pub async fn handle_event(&self, event: FileEvent) -> Result<Option<SyncOutcome>> {
        match event {
            FileEvent::Created(path) => {
                if self.refs().get(&path).await.or_raise(|| ErrorKind::Refs)?.is_some() {
                    return self.sync_file(&path).await.map(Some);
                }
                match self.primary_of(&path).await? {
                    Some(primary) => self.sync_done(&primary).await,
                    None => Ok(None),
                }
            },
            FileEvent::Updated(path) => match self.tracked(&path).await {
                Ok(_) => self.sync_file(&path).await.map(Some),
                Err(err) if matches!(&*err, ErrorKind::NotLinked(_)) => Ok(None),
                Err(err) => Err(err),
            },
            FileEvent::Deleted(path) => {
                // A deleted local copy never deletes the remote one.
                let unlinked = self.unlink(&path).await?;
                if unlinked {
                    tracing::info!(local = %path.display(), "local file deleted, link dropped");
                }
                Ok(None)
            },
        }
    }

    /// The linked primary whose done file is `path`.
    async fn primary_of(&self, path: &Path) -> Result<Option<PathBuf>> {
        let file_refs = self.refs().list(None).await.or_raise(|| ErrorKind::Refs)?;
        Ok(file_refs
            .into_iter()
            .map(|file_ref| file_ref.local_file_path)
            .find(|primary| self.done_path(primary).as_deref() == Some(path)))
    }
}
