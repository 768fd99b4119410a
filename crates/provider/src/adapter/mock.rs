//! In-memory provider for testing.

use crate::ProviderAdapter;
use crate::auth::Authorizer;
use crate::error::{ErrorKind, Result};
use crate::hash::content_hash;
use crate::models::{ListPage, Provider, RemoteFile, RemoteItem, RevisionKind, UploadMode};
use crate::path::{file_name, normalize};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredFile {
    content: String,
    revision: u64,
}

#[derive(Debug, Default)]
struct Counters {
    metadata: AtomicUsize,
    download: AtomicUsize,
    upload: AtomicUsize,
    delete: AtomicUsize,
}

/// In-memory provider for testing.
///
/// Files live in a `BTreeMap` behind a [`RwLock`], revisions come from a
/// monotonically increasing counter, and every remote operation is counted so
/// tests can assert on the exact request sequence. Each operation yields to
/// the runtime once before touching state, like a real network round trip
/// would.
///
/// # Examples
///
/// ```
/// use todosync_provider::adapter::MockProvider;
/// use todosync_provider::{Provider, ProviderAdapter};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let provider = MockProvider::with_files(Provider::Dropbox, [("/todo.txt", "(A) call mum")]);
/// assert_eq!(provider.download_file("/todo.txt").await?, "(A) call mum");
/// assert_eq!(provider.downloads(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MockProvider {
    provider: Provider,
    kind: RevisionKind,
    report_hashes: bool,
    files: RwLock<BTreeMap<String, StoredFile>>,
    next_revision: AtomicU64,
    counters: Counters,
    failure: RwLock<Option<ErrorKind>>,
    delete_failure: RwLock<Option<ErrorKind>>,
    authenticated: AtomicBool,
}

impl MockProvider {
    pub fn new(provider: Provider) -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(provider, files)
    }

    /// Create a mock provider pre-populated with files.
    ///
    /// Panics if any path fails validation. If test setup is wrong, then test
    /// should not pass.
    pub fn with_files(provider: Provider, files: impl IntoIterator<Item = (impl AsRef<str>, impl Into<String>)>) -> Self {
        let mut map = BTreeMap::new();
        let mut revision = 0;
        for (path, content) in files {
            let Ok(path) = normalize(path.as_ref()) else {
                panic!("MockProvider::with_files: invalid path {}", path.as_ref());
            };
            revision += 1;
            map.insert(path, StoredFile { content: content.into(), revision });
        }
        Self {
            provider,
            kind: RevisionKind::Exact,
            report_hashes: matches!(provider, Provider::Dropbox),
            files: RwLock::new(map),
            next_revision: AtomicU64::new(revision + 1),
            counters: Counters::default(),
            failure: RwLock::new(None),
            delete_failure: RwLock::new(None),
            authenticated: AtomicBool::new(true),
        }
    }

    /// Whether metadata should carry a content hash (Dropbox does, WebDAV
    /// doesn't).
    pub fn with_content_hashes(mut self, report: bool) -> Self {
        self.report_hashes = report;
        self
    }

    pub fn with_revision_kind(mut self, kind: RevisionKind) -> Self {
        self.kind = kind;
        self
    }

    /// Start signed out: every operation fails with `Unauthorized` until
    /// [`authenticate`](ProviderAdapter::authenticate) is called.
    pub fn signed_out(self) -> Self {
        self.authenticated.store(false, Ordering::SeqCst);
        self
    }

    /// Simulate a change made by another device.
    pub async fn put_remote(&self, path: &str, content: impl Into<String>) -> String {
        let revision = self.bump();
        let path = normalize(path).unwrap_or_else(|_| path.to_string());
        self.files.write().await.insert(path, StoredFile { content: content.into(), revision });
        revision.to_string()
    }

    /// Simulate a deletion made by another device.
    pub async fn remove_remote(&self, path: &str) -> bool {
        let path = normalize(path).unwrap_or_else(|_| path.to_string());
        self.files.write().await.remove(&path).is_some()
    }

    pub async fn remote_content(&self, path: &str) -> Option<String> {
        let path = normalize(path).ok()?;
        self.files.read().await.get(&path).map(|f| f.content.clone())
    }

    pub async fn revision(&self, path: &str) -> Option<String> {
        let path = normalize(path).ok()?;
        self.files.read().await.get(&path).map(|f| f.revision.to_string())
    }

    /// Make every following operation fail with `kind`.
    pub async fn fail_with(&self, kind: ErrorKind) {
        *self.failure.write().await = Some(kind);
    }

    /// Make only deletes fail with `kind`; everything else keeps working.
    pub async fn fail_deletes_with(&self, kind: ErrorKind) {
        *self.delete_failure.write().await = Some(kind);
    }

    pub async fn clear_failure(&self) {
        *self.failure.write().await = None;
        *self.delete_failure.write().await = None;
    }

    pub fn metadata_requests(&self) -> usize {
        self.counters.metadata.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.counters.download.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> usize {
        self.counters.upload.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.counters.delete.load(Ordering::SeqCst)
    }

    /// Total number of remote operations performed so far.
    pub fn requests(&self) -> usize {
        self.metadata_requests() + self.downloads() + self.uploads() + self.deletes()
    }

    fn bump(&self) -> u64 {
        self.next_revision.fetch_add(1, Ordering::SeqCst)
    }

    fn remote_file(&self, path: &str, stored: &StoredFile) -> RemoteFile {
        let file = RemoteFile::new(path, stored.revision.to_string());
        match self.report_hashes {
            true => file.with_content_hash(content_hash(stored.content.as_bytes())),
            false => file,
        }
    }

    async fn round_trip(&self, counter: &AtomicUsize) -> Result<()> {
        tokio::task::yield_now().await;
        counter.fetch_add(1, Ordering::SeqCst);
        if !self.authenticated.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Unauthorized(self.provider));
        }
        if let Some(kind) = self.failure.read().await.clone() {
            exn::bail!(kind);
        }
        Ok(())
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn revision_kind(&self) -> RevisionKind {
        self.kind
    }

    async fn authenticate(&self, _authorizer: &dyn Authorizer) -> Result<()> {
        self.authenticated.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn create_client(&self) -> Result<()> {
        match self.authenticated.load(Ordering::SeqCst) {
            true => Ok(()),
            false => exn::bail!(ErrorKind::Unauthorized(self.provider)),
        }
    }

    async fn has_credentials(&self) -> Result<bool> {
        Ok(self.authenticated.load(Ordering::SeqCst))
    }

    async fn sign_out(&self) -> Result<()> {
        self.authenticated.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn list_files(&self, path: &str, _cursor: Option<&str>) -> Result<ListPage> {
        self.round_trip(&self.counters.metadata).await?;
        let dir = normalize(path)?;
        let prefix = match dir.as_str() {
            "/" => "/".to_string(),
            dir => format!("{dir}/"),
        };
        let guard = self.files.read().await;
        let mut folders = BTreeSet::new();
        let mut items = Vec::new();
        for (path, stored) in guard.iter() {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((folder, _)) => {
                    folders.insert(folder.to_string());
                },
                None => items.push(RemoteItem::File(self.remote_file(path, stored))),
            }
        }
        items.extend(folders.into_iter().map(|name| RemoteItem::Folder { path: format!("{prefix}{name}"), name }));
        Ok(ListPage { items, cursor: None, has_more: false })
    }

    async fn get_metadata(&self, path: &str) -> Result<RemoteFile> {
        self.round_trip(&self.counters.metadata).await?;
        let path = normalize(path)?;
        let guard = self.files.read().await;
        let stored = guard.get(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok(self.remote_file(&path, stored))
    }

    async fn download_file(&self, path: &str) -> Result<String> {
        self.round_trip(&self.counters.download).await?;
        let path = normalize(path)?;
        let guard = self.files.read().await;
        let stored = guard.get(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok(stored.content.clone())
    }

    async fn upload_file(&self, path: &str, content: &str, mode: UploadMode) -> Result<RemoteFile> {
        self.round_trip(&self.counters.upload).await?;
        let path = normalize(path)?;
        if file_name(&path).is_empty() {
            exn::bail!(ErrorKind::InvalidPath(path));
        }
        let mut guard = self.files.write().await;
        if mode == UploadMode::Create && guard.contains_key(&path) {
            exn::bail!(ErrorKind::Conflict(path));
        }
        let stored = StoredFile { content: content.to_string(), revision: self.bump() };
        let file = self.remote_file(&path, &stored);
        guard.insert(path, stored);
        Ok(file)
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        self.round_trip(&self.counters.delete).await?;
        if let Some(kind) = self.delete_failure.read().await.clone() {
            exn::bail!(kind);
        }
        let path = normalize(path)?;
        self.files.write().await.remove(&path).map(|_| ()).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Baseline;
    use crate::SyncResult;

    fn baseline(path: &str, revision: &str, content: &str) -> Baseline {
        Baseline {
            path: path.to_string(),
            revision: revision.to_string(),
            content_hash: content_hash(content.as_bytes()),
        }
    }

    #[tokio::test]
    async fn test_upload_and_download() {
        let provider = MockProvider::new(Provider::Dropbox);
        let uploaded = provider.upload_file("/todo.txt", "hello", UploadMode::Create).await.unwrap();
        assert_eq!(uploaded.name, "todo.txt");
        assert_eq!(uploaded.content_hash.as_deref(), Some(content_hash(b"hello").as_str()));
        assert_eq!(provider.download_file("/todo.txt").await.unwrap(), "hello");
        let metadata = provider.get_metadata("todo.txt").await.unwrap();
        assert_eq!(metadata.revision, uploaded.revision);
    }

    #[tokio::test]
    async fn test_create_refuses_to_overwrite() {
        let provider = MockProvider::with_files(Provider::WebDav, [("/todo.txt", "theirs")]);
        let err = provider.upload_file("/todo.txt", "mine", UploadMode::Create).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Conflict(_)));
        assert_eq!(provider.remote_content("/todo.txt").await.as_deref(), Some("theirs"));
        provider.upload_file("/todo.txt", "mine", UploadMode::Update).await.unwrap();
        assert_eq!(provider.remote_content("/todo.txt").await.as_deref(), Some("mine"));
    }

    #[tokio::test]
    async fn test_missing_file_errors() {
        let provider = MockProvider::new(Provider::Dropbox);
        let err = provider.get_metadata("/nope.txt").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        let err = provider.delete_file("/nope.txt").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_files_groups_folders() {
        let provider =
            MockProvider::with_files(Provider::Dropbox, [("/todo.txt", "a"), ("/work/todo.txt", "b"), ("/work/x/y.txt", "c")]);
        let root = provider.list_files("/", None).await.unwrap();
        let names: Vec<_> = root.items.iter().map(RemoteItem::name).collect();
        assert_eq!(names, ["todo.txt", "work"]);
        let work = provider.list_files("/work", None).await.unwrap();
        let paths: Vec<_> = work.items.iter().map(RemoteItem::path).collect();
        assert_eq!(paths, ["/work/todo.txt", "/work/x"]);
        assert!(!work.has_more);
    }

    #[tokio::test]
    async fn test_signed_out_is_unauthorized() {
        let provider = MockProvider::new(Provider::WebDav).signed_out();
        let err = provider.get_metadata("/todo.txt").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Unauthorized(Provider::WebDav)));
        assert!(!provider.has_credentials().await.unwrap());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let provider = MockProvider::with_files(Provider::Dropbox, [("/todo.txt", "a")]);
        provider.fail_with(ErrorKind::Network("offline".into())).await;
        let err = provider.download_file("/todo.txt").await.unwrap_err();
        assert!(err.is_retryable());
        provider.clear_failure().await;
        assert!(provider.download_file("/todo.txt").await.is_ok());
    }

    #[tokio::test]
    async fn test_injected_delete_failure() {
        let provider = MockProvider::with_files(Provider::Dropbox, [("/todo.txt", "a")]);
        provider.fail_deletes_with(ErrorKind::Network("offline".into())).await;
        assert!(provider.download_file("/todo.txt").await.is_ok());
        assert!(provider.delete_file("/todo.txt").await.is_err());
        assert_eq!(provider.remote_content("/todo.txt").await.as_deref(), Some("a"));
        provider.clear_failure().await;
        assert!(provider.delete_file("/todo.txt").await.is_ok());
    }

    #[tokio::test]
    async fn test_sync_file_twice_is_no_action() {
        let provider = MockProvider::with_files(Provider::Dropbox, [("/todo.txt", "x")]);
        let revision = provider.revision("/todo.txt").await.unwrap();
        let base = baseline("/todo.txt", &revision, "x");
        assert_eq!(provider.sync_file(&base, "x").await.unwrap(), SyncResult::Unchanged(None));
        assert_eq!(provider.sync_file(&base, "x").await.unwrap(), SyncResult::Unchanged(None));
        assert_eq!(provider.uploads() + provider.downloads(), 0);
    }

    #[tokio::test]
    async fn test_sync_file_pushes_local_change() {
        let provider = MockProvider::with_files(Provider::Dropbox, [("/todo.txt", "x")]);
        let revision = provider.revision("/todo.txt").await.unwrap();
        let SyncResult::Uploaded(uploaded) =
            provider.sync_file(&baseline("/todo.txt", &revision, "x"), "y").await.unwrap()
        else {
            panic!("expected an upload");
        };
        assert_ne!(uploaded.revision, revision);
        assert_eq!(provider.get_metadata("/todo.txt").await.unwrap().revision, uploaded.revision);
        assert_eq!(provider.remote_content("/todo.txt").await.as_deref(), Some("y"));
    }

    #[tokio::test]
    async fn test_sync_file_pulls_remote_change() {
        let provider = MockProvider::with_files(Provider::Dropbox, [("/todo.txt", "x")]);
        let old = provider.revision("/todo.txt").await.unwrap();
        let new = provider.put_remote("/todo.txt", "from phone").await;
        let result = provider.sync_file(&baseline("/todo.txt", &old, "x"), "x").await.unwrap();
        let SyncResult::Downloaded { remote, content } = result else {
            panic!("expected a download");
        };
        assert_eq!(remote.revision, new);
        assert_eq!(content, "from phone");
        assert_eq!(provider.uploads(), 0);
    }

    #[tokio::test]
    async fn test_sync_file_conflict_transfers_nothing() {
        let provider = MockProvider::with_files(Provider::Dropbox, [("/todo.txt", "x")]);
        let old = provider.revision("/todo.txt").await.unwrap();
        provider.put_remote("/todo.txt", "theirs").await;
        let result = provider.sync_file(&baseline("/todo.txt", &old, "x"), "mine").await.unwrap();
        assert!(matches!(result, SyncResult::Conflict(_)));
        assert_eq!(provider.uploads() + provider.downloads(), 0);
    }

    #[tokio::test]
    async fn test_sync_file_converged_content() {
        let provider = MockProvider::with_files(Provider::Dropbox, [("/todo.txt", "x")]);
        let old = provider.revision("/todo.txt").await.unwrap();
        let new = provider.put_remote("/todo.txt", "same").await;
        let result = provider.sync_file(&baseline("/todo.txt", &old, "x"), "same").await.unwrap();
        let SyncResult::Unchanged(Some(remote)) = result else {
            panic!("expected converged metadata");
        };
        assert_eq!(remote.revision, new);
    }

    #[tokio::test]
    async fn test_sync_file_recreates_missing_remote() {
        let provider = MockProvider::with_files(Provider::WebDav, [("/todo.txt", "x")]);
        let old = provider.revision("/todo.txt").await.unwrap();
        provider.remove_remote("/todo.txt").await;
        let result = provider.sync_file(&baseline("/todo.txt", &old, "x"), "x").await.unwrap();
        assert!(matches!(result, SyncResult::Uploaded(_)));
        assert_eq!(provider.remote_content("/todo.txt").await.as_deref(), Some("x"));
    }
}
