//! Key-value preference storage.
//!
//! The reference tables and a handful of settings are stored as JSON strings
//! under well-known keys. Where they physically live is up to the
//! [`PreferenceStore`] implementation.

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock};

/// Async string key-value store.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>>;
    async fn set_item(&self, key: &str, value: &str) -> Result<()>;
    /// Removing a key that doesn't exist is not an error.
    async fn remove_item(&self, key: &str) -> Result<()>;
}

/// In-memory preferences, mostly for tests.
///
/// Counts writes so tests can check that a logical update is persisted with
/// exactly one `set_item` call.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: RwLock<BTreeMap<String, String>>,
    writes: AtomicUsize,
}
impl MemoryPreferences {
    pub fn with_values(values: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>) -> Self {
        Self {
            values: RwLock::new(values.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of `set_item`/`remove_item` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferences {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.values.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.values.write().await.remove(key);
        Ok(())
    }
}

/// Preferences kept in one JSON object on disk.
///
/// Every write replaces the whole file atomically (sibling temp file, then
/// rename), so a crash mid-write leaves the previous version in place.
#[derive(Debug)]
pub struct JsonFilePreferences {
    path: PathBuf,
    lock: Mutex<()>,
}
impl JsonFilePreferences {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, String>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e).or_raise(|| ErrorKind::Preferences),
        };
        match serde_json::from_slice(&bytes) {
            Ok(values) => Ok(values),
            Err(err) => {
                // Keep the broken file around for inspection; the next write replaces it.
                tracing::warn!(path = %self.path.display(), error = %err, "preference file is corrupt, starting empty");
                Ok(BTreeMap::new())
            },
        }
    }

    async fn store(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Preferences)?;
        }
        let json = serde_json::to_vec_pretty(values).or_raise(|| ErrorKind::Serialize("preferences"))?;
        let temp = self.path.with_extension("tmp");
        tokio::fs::write(&temp, json).await.or_raise(|| ErrorKind::Preferences)?;
        tokio::fs::rename(&temp, &self.path).await.or_raise(|| ErrorKind::Preferences)
    }
}

#[async_trait]
impl PreferenceStore for JsonFilePreferences {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(key))
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut values = self.load().await?;
        values.insert(key.to_string(), value.to_string());
        self.store(&values).await
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut values = self.load().await?;
        if values.remove(key).is_some() {
            self.store(&values).await?;
        }
        Ok(())
    }
}
