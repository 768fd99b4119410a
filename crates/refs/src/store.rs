//! The two reference tables.
//!
//! Each table is one JSON array under its own preference key. Every mutation
//! is read-modify-write under a single lock and persisted with exactly one
//! `set_item` call, so concurrent callers can never interleave half-updates.

use crate::error::{ErrorKind, Result};
use crate::models::{DoneFileRef, FileRef};
use crate::prefs::PreferenceStore;
use exn::ResultExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use todosync_provider::Provider;
use tokio::sync::Mutex;

pub const FILE_REFS_KEY: &str = "cloud-file-refs";
pub const DONE_FILE_REFS_KEY: &str = "cloud-done-file-refs";

/// Row access shared by both tables.
trait Row: Serialize + DeserializeOwned {
    fn local(&self) -> &Path;
    fn provider(&self) -> Provider;
    fn remote_path(&self) -> &str;

    /// Whether `other` would violate uniqueness if both were stored.
    fn collides(&self, other: &Self) -> bool {
        self.local() == other.local() || (self.provider() == other.provider() && self.remote_path() == other.remote_path())
    }
}
impl Row for FileRef {
    fn local(&self) -> &Path {
        &self.local_file_path
    }
    fn provider(&self) -> Provider {
        self.provider
    }
    fn remote_path(&self) -> &str {
        &self.path
    }
}
impl Row for DoneFileRef {
    fn local(&self) -> &Path {
        &self.local_file_path
    }
    fn provider(&self) -> Provider {
        self.provider
    }
    fn remote_path(&self) -> &str {
        &self.path
    }
}

/// Persistent mapping from local files to their remote copies.
pub struct RefStore {
    prefs: Arc<dyn PreferenceStore>,
    lock: Mutex<()>,
}
impl RefStore {
    pub fn new(prefs: Arc<dyn PreferenceStore>) -> Self {
        Self { prefs, lock: Mutex::new(()) }
    }

    pub fn preferences(&self) -> &Arc<dyn PreferenceStore> {
        &self.prefs
    }

    async fn load<T: Row>(&self, key: &str) -> Result<Vec<T>> {
        let Some(raw) = self.prefs.get_item(key).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(rows) => Ok(rows),
            Err(err) => {
                tracing::warn!(key, error = %err, "reference table is unreadable, treating it as empty");
                Ok(Vec::new())
            },
        }
    }

    async fn save<T: Row>(&self, key: &str, rows: &[T]) -> Result<()> {
        let json = serde_json::to_string(rows).or_raise(|| ErrorKind::Serialize("reference table"))?;
        self.prefs.set_item(key, &json).await
    }

    async fn upsert<T: Row>(&self, key: &str, incoming: Vec<T>) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut rows: Vec<T> = self.load(key).await?;
        for row in incoming {
            rows.retain(|existing| !existing.collides(&row));
            rows.push(row);
        }
        self.save(key, &rows).await
    }

    async fn delete<T: Row + Clone>(&self, key: &str, local: &Path) -> Result<Option<T>> {
        let _guard = self.lock.lock().await;
        let mut rows: Vec<T> = self.load(key).await?;
        let Some(index) = rows.iter().position(|row| row.local() == local) else {
            return Ok(None);
        };
        let removed = rows.remove(index);
        self.save(key, &rows).await?;
        Ok(Some(removed))
    }

    async fn delete_provider<T: Row>(&self, key: &str, provider: Provider) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let mut rows: Vec<T> = self.load(key).await?;
        let before = rows.len();
        rows.retain(|row| row.provider() != provider);
        let removed = before - rows.len();
        if removed > 0 {
            self.save(key, &rows).await?;
        }
        Ok(removed)
    }

    pub async fn get(&self, local: &Path) -> Result<Option<FileRef>> {
        let rows: Vec<FileRef> = self.load(FILE_REFS_KEY).await?;
        Ok(rows.into_iter().find(|row| row.local_file_path == local))
    }

    /// Look up the ref linked to a remote path on one provider.
    pub async fn find_remote(&self, provider: Provider, path: &str) -> Result<Option<FileRef>> {
        let rows: Vec<FileRef> = self.load(FILE_REFS_KEY).await?;
        Ok(rows.into_iter().find(|row| row.provider == provider && row.path == path))
    }

    pub async fn list(&self, provider: Option<Provider>) -> Result<Vec<FileRef>> {
        let rows: Vec<FileRef> = self.load(FILE_REFS_KEY).await?;
        Ok(rows.into_iter().filter(|row| provider.is_none_or(|p| row.provider == p)).collect())
    }

    /// Insert or replace. Any existing row for the same local path, or for
    /// the same remote path on the same provider, is replaced.
    pub async fn set(&self, file_ref: FileRef) -> Result<()> {
        tracing::debug!(local = %file_ref.local_file_path.display(), path = %file_ref.path, revision = %file_ref.revision, "storing file ref");
        self.upsert(FILE_REFS_KEY, vec![file_ref]).await
    }

    /// Insert or replace several rows with a single write.
    pub async fn set_many(&self, file_refs: Vec<FileRef>) -> Result<()> {
        self.upsert(FILE_REFS_KEY, file_refs).await
    }

    pub async fn remove(&self, local: &Path) -> Result<Option<FileRef>> {
        self.delete(FILE_REFS_KEY, local).await
    }

    pub async fn get_done(&self, primary: &Path) -> Result<Option<DoneFileRef>> {
        let rows: Vec<DoneFileRef> = self.load(DONE_FILE_REFS_KEY).await?;
        Ok(rows.into_iter().find(|row| row.local_file_path == primary))
    }

    pub async fn list_done(&self, provider: Option<Provider>) -> Result<Vec<DoneFileRef>> {
        let rows: Vec<DoneFileRef> = self.load(DONE_FILE_REFS_KEY).await?;
        Ok(rows.into_iter().filter(|row| provider.is_none_or(|p| row.provider == p)).collect())
    }

    pub async fn set_done(&self, done_ref: DoneFileRef) -> Result<()> {
        tracing::debug!(primary = %done_ref.local_file_path.display(), path = %done_ref.path, "storing done file ref");
        self.upsert(DONE_FILE_REFS_KEY, vec![done_ref]).await
    }

    pub async fn set_many_done(&self, done_refs: Vec<DoneFileRef>) -> Result<()> {
        self.upsert(DONE_FILE_REFS_KEY, done_refs).await
    }

    pub async fn remove_done(&self, primary: &Path) -> Result<Option<DoneFileRef>> {
        self.delete(DONE_FILE_REFS_KEY, primary).await
    }

    /// Drop every ref (both tables) belonging to `provider`. Returns how many
    /// rows were removed in total.
    pub async fn remove_provider(&self, provider: Provider) -> Result<usize> {
        let files = self.delete_provider::<FileRef>(FILE_REFS_KEY, provider).await?;
        let done = self.delete_provider::<DoneFileRef>(DONE_FILE_REFS_KEY, provider).await?;
        tracing::info!(%provider, files, done, "removed provider refs");
        Ok(files + done)
    }

    /// Providers with at least one linked file.
    pub async fn providers(&self) -> Result<BTreeSet<Provider>> {
        Ok(self.list(None).await?.into_iter().map(|row| row.provider).collect())
    }
}
