//! Local file access.
//!
//! The engine never touches the file system directly; everything goes through
//! [`LocalFiles`] so tests can run against [`MemoryFiles`].

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

#[async_trait]
pub trait LocalFiles: Send + Sync {
    /// Read a text file. `None` if it doesn't exist.
    async fn read(&self, path: &Path) -> Result<Option<String>>;
    /// Replace the file's content, creating parent directories as needed.
    async fn write(&self, path: &Path, content: &str) -> Result<()>;
    /// Deleting a missing file is not an error.
    async fn delete(&self, path: &Path) -> Result<()>;

    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.read(path).await?.is_some())
    }
}

/// Files on disk, through `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskFiles;

#[async_trait]
impl LocalFiles for DiskFiles {
    async fn read(&self, path: &Path) -> Result<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).or_raise(|| ErrorKind::Local(path.to_path_buf())),
        }
    }

    async fn write(&self, path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Local(path.to_path_buf()))?;
        }
        // Write next to the target and rename over it, so readers never see
        // a half-written task list.
        let mut temp = path.as_os_str().to_owned();
        temp.push(".partial");
        let temp = PathBuf::from(temp);
        tokio::fs::write(&temp, content).await.or_raise(|| ErrorKind::Local(path.to_path_buf()))?;
        tokio::fs::rename(&temp, path).await.or_raise(|| ErrorKind::Local(path.to_path_buf()))
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).or_raise(|| ErrorKind::Local(path.to_path_buf())),
        }
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        tokio::fs::try_exists(path).await.or_raise(|| ErrorKind::Local(path.to_path_buf()))
    }
}

/// In-memory files for tests.
#[derive(Debug, Default)]
pub struct MemoryFiles {
    files: RwLock<BTreeMap<PathBuf, String>>,
}
impl MemoryFiles {
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<String>)>) -> Self {
        Self {
            files: RwLock::new(files.into_iter().map(|(path, content)| (path.into(), content.into())).collect()),
        }
    }

    pub async fn content(&self, path: impl AsRef<Path>) -> Option<String> {
        self.files.read().await.get(path.as_ref()).cloned()
    }
}

#[async_trait]
impl LocalFiles for MemoryFiles {
    async fn read(&self, path: &Path) -> Result<Option<String>> {
        Ok(self.files.read().await.get(path).cloned())
    }

    async fn write(&self, path: &Path, content: &str) -> Result<()> {
        self.files.write().await.insert(path.to_path_buf(), content.to_string());
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        self.files.write().await.remove(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disk_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lists").join("todo.txt");
        let files = DiskFiles;
        assert_eq!(files.read(&path).await.unwrap(), None);
        assert!(!files.exists(&path).await.unwrap());

        files.write(&path, "(A) buy milk\n").await.unwrap();
        assert_eq!(files.read(&path).await.unwrap().as_deref(), Some("(A) buy milk\n"));
        assert!(files.exists(&path).await.unwrap());
        assert!(!dir.path().join("lists").join("todo.txt.partial").exists());

        files.delete(&path).await.unwrap();
        files.delete(&path).await.unwrap();
        assert_eq!(files.read(&path).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_disk_files_rejects_binary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("todo.txt");
        std::fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();
        let err = DiskFiles.read(&path).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Local(p) if p == &path));
    }

    #[tokio::test]
    async fn test_memory_files() {
        let files = MemoryFiles::with_files([("/todo.txt", "x")]);
        assert!(files.exists(Path::new("/todo.txt")).await.unwrap());
        files.write(Path::new("/done.txt"), "y").await.unwrap();
        assert_eq!(files.content("/done.txt").await.as_deref(), Some("y"));
        files.delete(Path::new("/todo.txt")).await.unwrap();
        assert_eq!(files.read(Path::new("/todo.txt")).await.unwrap(), None);
    }
}
