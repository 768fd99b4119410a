//! Credential storage.
//!
//! Adapters keep long-lived secrets (Dropbox refresh token, WebDAV login)
//! behind the [`CredentialStore`] trait. Short-lived access tokens are never
//! persisted, they live in the adapter's [`ClientCache`](crate::ClientCache).

use crate::error::{ErrorKind, Result};
use crate::models::Provider;
use async_trait::async_trait;
use exn::ResultExt;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};

/// Storage key for a provider-scoped credential, e.g. `Dropbox-refresh-token`.
pub fn credential_key(provider: Provider, field: &str) -> String {
    format!("{provider}-{field}")
}

/// Async key-value store for secrets.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Removing a key that doesn't exist is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory credentials, forgotten when the process exits.
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    values: RwLock<BTreeMap<String, String>>,
}
impl MemoryCredentials {
    pub fn with_values(values: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>) -> Self {
        Self {
            values: RwLock::new(values.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentials {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.write().await.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.values.write().await.remove(key);
        Ok(())
    }
}

/// Credentials kept in a single JSON object on disk.
///
/// The file is replaced atomically (write to a sibling temp file, then
/// rename) and restricted to the owner on Unix.
#[derive(Debug)]
pub struct FileCredentials {
    path: PathBuf,
    lock: Mutex<()>,
}
impl FileCredentials {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, String>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).or_raise(|| ErrorKind::Credentials),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e).or_raise(|| ErrorKind::Credentials),
        }
    }

    async fn store(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Credentials)?;
        }
        let json = serde_json::to_vec_pretty(values).or_raise(|| ErrorKind::Credentials)?;
        let temp = self.path.with_extension("tmp");
        tokio::fs::write(&temp, json).await.or_raise(|| ErrorKind::Credentials)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&temp, std::fs::Permissions::from_mode(0o600))
                .await
                .or_raise(|| ErrorKind::Credentials)?;
        }
        tokio::fs::rename(&temp, &self.path).await.or_raise(|| ErrorKind::Credentials)
    }
}

#[async_trait]
impl CredentialStore for FileCredentials {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut values = self.load().await?;
        values.insert(key.to_string(), value.to_string());
        self.store(&values).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut values = self.load().await?;
        if values.remove(key).is_some() {
            self.store(&values).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_key() {
        assert_eq!(credential_key(Provider::Dropbox, "refresh-token"), "Dropbox-refresh-token");
        assert_eq!(credential_key(Provider::WebDav, "password"), "WebDAV-password");
    }

    #[tokio::test]
    async fn test_memory_round_trip() {
        let store = MemoryCredentials::default();
        assert_eq!(store.get("a").await.unwrap(), None);
        store.set("a", "1").await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
        store.remove("a").await.unwrap();
        store.remove("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("credentials.json");
        FileCredentials::new(&path).set("WebDAV-username", "me").await.unwrap();

        let reopened = FileCredentials::new(&path);
        assert_eq!(reopened.get("WebDAV-username").await.unwrap().as_deref(), Some("me"));
        reopened.remove("WebDAV-username").await.unwrap();
        assert_eq!(FileCredentials::new(&path).get("WebDAV-username").await.unwrap(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentials::new(dir.path().join("credentials.json"));
        store.set("Dropbox-refresh-token", "secret").await.unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_file_corrupt_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, "not json").unwrap();
        let err = FileCredentials::new(&path).get("x").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Credentials));
    }
}
