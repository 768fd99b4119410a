//! Per-file sync decisions and the operations built on them.

use crate::error::{ErrorKind, ProviderResultExt, Result};
use crate::hooks::{Conflict, ConflictResolver, DismissConflicts, LogNotifier, Notifier, Resolution};
use crate::local::{DiskFiles, LocalFiles};
use crate::migrate::{MigrationReport, migrate};
use crate::naming::FileNames;
use exn::{OptionExt, ResultExt};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use todosync_asyncutils::Coalesce;
use todosync_provider::error::{ErrorKind as ProviderErrorKind, Result as ProviderResult};
use todosync_provider::{
    AdapterHandle, Authorizer, Baseline, Provider, RemoteFile, SyncResult, UploadMode, content_hash, normalize_path,
};
use todosync_refs::{ArchiveSettings, DoneFileRef, FileRef, PreferenceStore, RefStore};

pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(120);
pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// A batch sync with `only_when_outdated` is skipped unless every ref is
    /// at least this old.
    pub stale_after: Duration,
    /// Files synced in parallel by a batch sync.
    pub concurrency: usize,
    pub names: FileNames,
}
impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            stale_after: DEFAULT_STALE_AFTER,
            concurrency: DEFAULT_CONCURRENCY,
            names: FileNames::default(),
        }
    }
}

/// What a sync did to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    NoAction,
    /// Local content was uploaded; `new_ref` is the stored baseline.
    Pushed { new_ref: FileRef },
    /// Remote content was downloaded and written locally.
    Pulled { new_ref: FileRef, content: String },
    /// Both sides changed and the conflict was not resolved. Nothing was
    /// transferred and the stored ref is unchanged.
    Conflict { remote: RemoteFile, local_content: String },
}

/// The table a local file is tracked in.
#[derive(Debug, Clone)]
pub(crate) enum Tracked {
    Primary(FileRef),
    /// A done file, keyed by its primary's local path.
    Done { primary: PathBuf, done_ref: DoneFileRef },
}
impl Tracked {
    fn provider(&self) -> Provider {
        match self {
            Self::Primary(file_ref) => file_ref.provider,
            Self::Done { done_ref, .. } => done_ref.provider,
        }
    }

    fn baseline(&self) -> Baseline {
        match self {
            Self::Primary(file_ref) => file_ref.baseline(),
            Self::Done { done_ref, .. } => done_ref.baseline(),
        }
    }
}

type FlightResult = std::result::Result<SyncOutcome, ErrorKind>;

struct Inner {
    adapters: HashMap<Provider, AdapterHandle>,
    refs: RefStore,
    archive: ArchiveSettings,
    local: Arc<dyn LocalFiles>,
    resolver: Arc<dyn ConflictResolver>,
    notifier: Arc<dyn Notifier>,
    settings: SyncSettings,
    flights: Coalesce<PathBuf, FlightResult>,
    /// Providers whose expired session has already been reported.
    expired: Mutex<HashSet<Provider>>,
    migration: MigrationReport,
}

/// Keeps linked local files in step with their remote copies.
///
/// Cheap to clone; clones share adapters, reference tables and the in-flight
/// sync map.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

pub struct SyncEngineBuilder {
    prefs: Arc<dyn PreferenceStore>,
    adapters: HashMap<Provider, AdapterHandle>,
    local: Arc<dyn LocalFiles>,
    resolver: Arc<dyn ConflictResolver>,
    notifier: Arc<dyn Notifier>,
    settings: SyncSettings,
}
impl SyncEngineBuilder {
    pub fn new(prefs: Arc<dyn PreferenceStore>) -> Self {
        Self {
            prefs,
            adapters: HashMap::new(),
            local: Arc::new(DiskFiles),
            resolver: Arc::new(DismissConflicts),
            notifier: Arc::new(LogNotifier),
            settings: SyncSettings::default(),
        }
    }

    /// Register an adapter under its own [`Provider`], replacing any previous
    /// one.
    pub fn adapter(mut self, adapter: AdapterHandle) -> Self {
        self.adapters.insert(adapter.provider(), adapter);
        self
    }

    pub fn local_files(mut self, local: Arc<dyn LocalFiles>) -> Self {
        self.local = local;
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn ConflictResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Upgrade legacy reference tables, then hand out the engine.
    pub async fn build(self) -> Result<SyncEngine> {
        let refs = RefStore::new(self.prefs.clone());
        let migration = match migrate(&refs, self.local.as_ref(), &self.settings.names).await {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!(error = ?err, "legacy migration failed, will retry on next start");
                MigrationReport::default()
            },
        };
        Ok(SyncEngine {
            inner: Arc::new(Inner {
                adapters: self.adapters,
                refs,
                archive: ArchiveSettings::new(self.prefs),
                local: self.local,
                resolver: self.resolver,
                notifier: self.notifier,
                settings: self.settings,
                flights: Coalesce::new(),
                expired: Mutex::new(HashSet::new()),
                migration,
            }),
        })
    }
}

impl SyncEngine {
    pub fn builder(prefs: Arc<dyn PreferenceStore>) -> SyncEngineBuilder {
        SyncEngineBuilder::new(prefs)
    }

    pub fn refs(&self) -> &RefStore {
        &self.inner.refs
    }

    pub fn archive_settings(&self) -> &ArchiveSettings {
        &self.inner.archive
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.inner.settings
    }

    pub fn local_files(&self) -> &Arc<dyn LocalFiles> {
        &self.inner.local
    }

    /// What the legacy migration did while this engine was built.
    pub fn migration_report(&self) -> &MigrationReport {
        &self.inner.migration
    }

    /// Providers with a registered adapter.
    pub fn providers(&self) -> BTreeSet<Provider> {
        self.inner.adapters.keys().copied().collect()
    }

    pub fn adapter(&self, provider: Provider) -> Result<&AdapterHandle> {
        self.inner.adapters.get(&provider).ok_or_raise(|| ErrorKind::Unavailable(provider))
    }

    pub(crate) fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.inner.notifier
    }

    /// Run the provider's sign-in handshake. A successful sign-in re-arms the
    /// session-expired notification.
    pub async fn authenticate(&self, provider: Provider, authorizer: &dyn Authorizer) -> Result<()> {
        self.adapter(provider)?.authenticate(authorizer).await.classify(provider)?;
        self.inner.expired.lock().unwrap_or_else(PoisonError::into_inner).remove(&provider);
        tracing::info!(%provider, "signed in");
        Ok(())
    }

    /// Upload a local file that has never been linked and start tracking it.
    /// The remote path defaults to `/<file name>`.
    #[tracing::instrument(skip_all, fields(local = %local.display(), %provider))]
    pub async fn link_file(&self, local: &Path, provider: Provider, remote_path: Option<&str>) -> Result<SyncOutcome> {
        let adapter = self.adapter(provider)?;
        let content = self.read_local(local).await?;
        let remote_path = match remote_path {
            Some(path) => path.to_string(),
            None => local
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| format!("/{name}"))
                .ok_or_raise(|| ErrorKind::Local(local.to_path_buf()))?,
        };
        let remote_path = normalize_path(&remote_path).classify(provider)?;
        let remote = adapter.upload_file(&remote_path, &content, UploadMode::Create).await.classify(provider)?;
        let new_ref = FileRef::new(local, provider, &remote, content_hash(content.as_bytes()));
        self.refs().set(new_ref.clone()).await.or_raise(|| ErrorKind::Refs)?;
        tracing::info!(path = %remote.path, revision = %remote.revision, "linked file");
        Ok(SyncOutcome::Pushed { new_ref })
    }

    /// Start tracking an existing remote file by downloading it to `local`.
    #[tracing::instrument(skip_all, fields(local = %local.display(), %provider, remote_path = %remote_path))]
    pub async fn import_file(&self, local: &Path, provider: Provider, remote_path: &str) -> Result<SyncOutcome> {
        let adapter = self.adapter(provider)?;
        let remote_path = normalize_path(remote_path).classify(provider)?;
        let remote = adapter.get_metadata(&remote_path).await.classify(provider)?;
        let content = adapter.download_file(&remote.path).await.classify(provider)?;
        self.write_local(local, &content).await?;
        let new_ref = FileRef::new(local, provider, &remote, content_hash(content.as_bytes()));
        self.refs().set(new_ref.clone()).await.or_raise(|| ErrorKind::Refs)?;
        tracing::info!(revision = %remote.revision, "imported file");
        Ok(SyncOutcome::Pulled { new_ref, content })
    }

    /// Sync the current on-disk content of `local`.
    ///
    /// At most one sync per local file runs at a time: a call made while one
    /// is in flight waits for it and receives the same outcome.
    pub async fn sync_file(&self, local: &Path) -> Result<SyncOutcome> {
        self.throttled(local, None).await
    }

    /// Like [`sync_file`](Self::sync_file), with content the caller already
    /// holds (and has written locally).
    pub async fn sync_content(&self, local: &Path, content: String) -> Result<SyncOutcome> {
        self.throttled(local, Some(content)).await
    }

    /// Stop tracking `local`, along with its done file. Nothing is deleted.
    pub async fn unlink(&self, local: &Path) -> Result<bool> {
        let removed = self.refs().remove(local).await.or_raise(|| ErrorKind::Refs)?;
        self.refs().remove_done(local).await.or_raise(|| ErrorKind::Refs)?;
        if let Some(file_ref) = &removed {
            tracing::info!(local = %local.display(), provider = %file_ref.provider, "unlinked file");
        }
        Ok(removed.is_some())
    }

    /// Delete the remote copies of `local` and its done file, then unlink.
    /// Local files are left alone.
    pub async fn delete_file(&self, local: &Path) -> Result<()> {
        let file_ref = self
            .refs()
            .get(local)
            .await
            .or_raise(|| ErrorKind::Refs)?
            .ok_or_raise(|| ErrorKind::NotLinked(local.to_path_buf()))?;
        let provider = file_ref.provider;
        let adapter = self.adapter(provider)?;
        ignore_missing(adapter.delete_file(&file_ref.path).await).classify(provider)?;
        if let Some(done_ref) = self.refs().get_done(local).await.or_raise(|| ErrorKind::Refs)? {
            ignore_missing(adapter.delete_file(&done_ref.path).await).classify(done_ref.provider)?;
        }
        self.unlink(local).await?;
        Ok(())
    }

    /// Sign out of `provider` and forget every file linked to it.
    pub async fn remove_provider(&self, provider: Provider) -> Result<usize> {
        if let Some(adapter) = self.inner.adapters.get(&provider) {
            adapter.sign_out().await.classify(provider)?;
        }
        let removed = self.refs().remove_provider(provider).await.or_raise(|| ErrorKind::Refs)?;
        self.inner.expired.lock().unwrap_or_else(PoisonError::into_inner).remove(&provider);
        Ok(removed)
    }

    async fn throttled(&self, local: &Path, content: Option<String>) -> Result<SyncOutcome> {
        let key = local.to_path_buf();
        let engine = self.clone();
        let flight = self.inner.flights.run(key.clone(), move || async move { engine.attempt(&key, content).await });
        flight.await.map_err(exn::Exn::from)
    }

    async fn attempt(&self, local: &Path, content: Option<String>) -> FlightResult {
        let result = self.run_sync(local, content).await.map_err(|err| {
            tracing::debug!(local = %local.display(), error = ?err, "sync attempt failed");
            (*err).clone()
        });
        if let Err(kind) = &result {
            self.report(local, kind).await;
        }
        result
    }

    /// Tell the user about a failure, the way its kind calls for.
    pub(crate) async fn report(&self, local: &Path, kind: &ErrorKind) {
        match kind {
            ErrorKind::Unauthorized(provider) => {
                let first = self.inner.expired.lock().unwrap_or_else(PoisonError::into_inner).insert(*provider);
                tracing::warn!(local = %local.display(), %provider, "session expired");
                if first {
                    self.inner.notifier.session_expired(*provider).await;
                }
            },
            ErrorKind::Network(message) => {
                tracing::warn!(local = %local.display(), %message, "provider unreachable, retrying on next sync");
            },
            other => {
                tracing::error!(local = %local.display(), error = %other, "sync failed");
                self.inner.notifier.sync_failed(local, other).await;
            },
        }
    }

    #[tracing::instrument(skip_all, fields(local = %local.display()))]
    async fn run_sync(&self, local: &Path, content: Option<String>) -> Result<SyncOutcome> {
        let tracked = self.tracked(local).await?;
        let provider = tracked.provider();
        let adapter = self.adapter(provider)?;
        let content = match content {
            Some(content) => content,
            None => self.read_local(local).await?,
        };
        match adapter.sync_file(&tracked.baseline(), &content).await.classify(provider)? {
            SyncResult::Unchanged(None) => Ok(SyncOutcome::NoAction),
            SyncResult::Unchanged(Some(remote)) => {
                tracing::info!(revision = %remote.revision, "both sides converged, refreshing revision");
                self.record(local, &tracked, &remote, &content).await?;
                Ok(SyncOutcome::NoAction)
            },
            SyncResult::Uploaded(remote) => {
                tracing::info!(revision = %remote.revision, "pushed local changes");
                let new_ref = self.record(local, &tracked, &remote, &content).await?;
                Ok(SyncOutcome::Pushed { new_ref })
            },
            SyncResult::Downloaded { remote, content } => {
                tracing::info!(revision = %remote.revision, "pulled remote changes");
                self.write_local(local, &content).await?;
                let new_ref = self.record(local, &tracked, &remote, &content).await?;
                Ok(SyncOutcome::Pulled { new_ref, content })
            },
            SyncResult::Conflict(remote) => self.resolve(local, &tracked, remote, content).await,
        }
    }

    /// Let the resolver pick a side, then transfer accordingly.
    pub(crate) async fn resolve(
        &self,
        local: &Path,
        tracked: &Tracked,
        remote: RemoteFile,
        local_content: String,
    ) -> Result<SyncOutcome> {
        let provider = tracked.provider();
        let adapter = self.adapter(provider)?;
        let conflict = Conflict {
            local_path: local.to_path_buf(),
            provider,
            remote,
            local_content,
        };
        tracing::info!(local = %local.display(), remote = %conflict.remote.path, "both sides changed");
        match self.inner.resolver.resolve(&conflict).await {
            Some(Resolution::KeepRemote) => {
                let content = adapter.download_file(&conflict.remote.path).await.classify(provider)?;
                self.write_local(local, &content).await?;
                let new_ref = self.record(local, tracked, &conflict.remote, &content).await?;
                Ok(SyncOutcome::Pulled { new_ref, content })
            },
            Some(Resolution::KeepLocal) => {
                let uploaded = adapter
                    .upload_file(&conflict.remote.path, &conflict.local_content, UploadMode::Update)
                    .await
                    .classify(provider)?;
                let new_ref = self.record(local, tracked, &uploaded, &conflict.local_content).await?;
                Ok(SyncOutcome::Pushed { new_ref })
            },
            None => Ok(SyncOutcome::Conflict { remote: conflict.remote, local_content: conflict.local_content }),
        }
    }

    /// Find the ref for `local` in either table.
    pub(crate) async fn tracked(&self, local: &Path) -> Result<Tracked> {
        if let Some(file_ref) = self.refs().get(local).await.or_raise(|| ErrorKind::Refs)? {
            return Ok(Tracked::Primary(file_ref));
        }
        let names = &self.inner.settings.names;
        let done_refs = self.refs().list_done(None).await.or_raise(|| ErrorKind::Refs)?;
        done_refs
            .into_iter()
            .find(|done_ref| names.done_path(&done_ref.local_file_path).as_deref() == Some(local))
            .map(|done_ref| Tracked::Done { primary: done_ref.local_file_path.clone(), done_ref })
            .ok_or_raise(|| ErrorKind::NotLinked(local.to_path_buf()))
    }

    /// Store a fresh baseline after a confirmed transfer.
    pub(crate) async fn record(&self, local: &Path, tracked: &Tracked, remote: &RemoteFile, content: &str) -> Result<FileRef> {
        let provider = tracked.provider();
        let hash = content_hash(content.as_bytes());
        if let Tracked::Done { primary, .. } = tracked {
            let done_ref = DoneFileRef::new(primary.clone(), provider, remote, hash.clone());
            self.refs().set_done(done_ref).await.or_raise(|| ErrorKind::Refs)?;
            return Ok(FileRef::new(local, provider, remote, hash));
        }
        let new_ref = FileRef::new(local, provider, remote, hash);
        self.refs().set(new_ref.clone()).await.or_raise(|| ErrorKind::Refs)?;
        Ok(new_ref)
    }

    pub(crate) async fn read_local(&self, local: &Path) -> Result<String> {
        self.inner.local.read(local).await?.ok_or_raise(|| ErrorKind::Local(local.to_path_buf()))
    }

    pub(crate) async fn write_local(&self, local: &Path, content: &str) -> Result<()> {
        self.inner.local.write(local, content).await
    }
}

/// `None` instead of a `NotFound` error.
pub(crate) fn found<T>(result: ProviderResult<T>) -> ProviderResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if matches!(&*err, ProviderErrorKind::NotFound(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Treat a missing remote file as already deleted.
pub(crate) fn ignore_missing(result: ProviderResult<()>) -> ProviderResult<()> {
    match result {
        Err(err) if matches!(&*err, ProviderErrorKind::NotFound(_)) => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fixture, Note, fixture};
    use rstest::rstest;
    use todosync_provider::adapter::MockProvider;
    use todosync_provider::{ProviderAdapter, RevisionKind};

    const TODO: &str = "/home/me/todo.txt";

    async fn linked(content: &str) -> Fixture {
        let fx = fixture(MockProvider::new(Provider::Dropbox), [(TODO, content)]).await;
        fx.engine.link_file(Path::new(TODO), Provider::Dropbox, None).await.unwrap();
        fx
    }

    #[tokio::test]
    async fn test_link_uploads_with_create() {
        let fx = fixture(MockProvider::new(Provider::Dropbox), [(TODO, "(A) call mum")]).await;
        let outcome = fx.engine.link_file(Path::new(TODO), Provider::Dropbox, None).await.unwrap();
        let SyncOutcome::Pushed { new_ref } = outcome else {
            panic!("expected a push, got {outcome:?}");
        };
        assert_eq!(new_ref.path, "/todo.txt");
        assert_eq!(new_ref.content_hash, content_hash(b"(A) call mum"));
        assert_eq!(Some(new_ref.revision.clone()), fx.remote.revision("/todo.txt").await);
        assert_eq!(fx.engine.refs().get(Path::new(TODO)).await.unwrap(), Some(new_ref));
    }

    #[tokio::test]
    async fn test_link_refuses_existing_remote() {
        let remote = MockProvider::with_files(Provider::Dropbox, [("/todo.txt", "theirs")]);
        let fx = fixture(remote, [(TODO, "mine")]).await;
        let err = fx.engine.link_file(Path::new(TODO), Provider::Dropbox, None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Conflict(_)));
        assert!(fx.engine.refs().get(Path::new(TODO)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_link_unknown_provider() {
        let fx = fixture(MockProvider::new(Provider::Dropbox), [(TODO, "x")]).await;
        let err = fx.engine.link_file(Path::new(TODO), Provider::WebDav, None).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Unavailable(Provider::WebDav));
    }

    #[tokio::test]
    async fn test_sync_twice_without_changes() {
        let fx = linked("x").await;
        let before = fx.engine.refs().get(Path::new(TODO)).await.unwrap();
        let writes = fx.prefs.writes();
        assert_eq!(fx.engine.sync_file(Path::new(TODO)).await.unwrap(), SyncOutcome::NoAction);
        assert_eq!(fx.engine.sync_file(Path::new(TODO)).await.unwrap(), SyncOutcome::NoAction);
        assert_eq!(fx.engine.refs().get(Path::new(TODO)).await.unwrap(), before);
        assert_eq!(fx.prefs.writes(), writes);
        assert_eq!(fx.remote.uploads(), 1);
    }

    #[tokio::test]
    async fn test_local_change_is_pushed() {
        let fx = linked("x").await;
        let outcome = fx.engine.sync_content(Path::new(TODO), "x\ny".to_string()).await.unwrap();
        let SyncOutcome::Pushed { new_ref } = outcome else {
            panic!("expected a push, got {outcome:?}");
        };
        let metadata = fx.remote.get_metadata("/todo.txt").await.unwrap();
        assert_eq!(new_ref.revision, metadata.revision);
        assert_eq!(fx.remote.remote_content("/todo.txt").await.as_deref(), Some("x\ny"));
    }

    #[tokio::test]
    async fn test_remote_change_is_pulled() {
        let fx = linked("x").await;
        let revision = fx.remote.put_remote("/todo.txt", "x\nfrom phone").await;
        let outcome = fx.engine.sync_file(Path::new(TODO)).await.unwrap();
        let SyncOutcome::Pulled { new_ref, content } = outcome else {
            panic!("expected a pull, got {outcome:?}");
        };
        assert_eq!(content, "x\nfrom phone");
        assert_eq!(new_ref.revision, revision);
        assert_eq!(new_ref.content_hash, content_hash(content.as_bytes()));
        assert_eq!(fx.files.content(TODO).await.as_deref(), Some("x\nfrom phone"));
    }

    #[tokio::test]
    async fn test_remote_deleted_is_recreated() {
        let fx = linked("x").await;
        fx.remote.remove_remote("/todo.txt").await;
        let outcome = fx.engine.sync_file(Path::new(TODO)).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Pushed { .. }));
        assert_eq!(fx.remote.remote_content("/todo.txt").await.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_dismissed_conflict_changes_nothing() {
        let fx = linked("x").await;
        fx.remote.put_remote("/todo.txt", "theirs").await;
        let (uploads, downloads) = (fx.remote.uploads(), fx.remote.downloads());
        let before = fx.engine.refs().get(Path::new(TODO)).await.unwrap();

        let outcome = fx.engine.sync_content(Path::new(TODO), "mine".to_string()).await.unwrap();
        let SyncOutcome::Conflict { remote, local_content } = outcome else {
            panic!("expected a conflict, got {outcome:?}");
        };
        assert_eq!(remote.path, "/todo.txt");
        assert_eq!(local_content, "mine");
        assert_eq!((fx.remote.uploads(), fx.remote.downloads()), (uploads, downloads));
        assert_eq!(fx.engine.refs().get(Path::new(TODO)).await.unwrap(), before);
        assert_eq!(fx.resolver.calls(), 1);
    }

    #[rstest]
    #[case(Resolution::KeepLocal, "mine")]
    #[case(Resolution::KeepRemote, "theirs")]
    #[tokio::test]
    async fn test_resolved_conflict(#[case] answer: Resolution, #[case] survivor: &str) {
        let fx = linked("x").await;
        fx.resolver.answer(Some(answer));
        fx.remote.put_remote("/todo.txt", "theirs").await;
        fx.files.write(Path::new(TODO), "mine").await.unwrap();

        let outcome = fx.engine.sync_file(Path::new(TODO)).await.unwrap();
        match answer {
            Resolution::KeepLocal => assert!(matches!(outcome, SyncOutcome::Pushed { .. })),
            Resolution::KeepRemote => assert!(matches!(outcome, SyncOutcome::Pulled { .. })),
        }
        assert_eq!(fx.files.content(TODO).await.as_deref(), Some(survivor));
        assert_eq!(fx.remote.remote_content("/todo.txt").await.as_deref(), Some(survivor));
        assert_eq!(fx.engine.sync_file(Path::new(TODO)).await.unwrap(), SyncOutcome::NoAction);
    }

    #[tokio::test]
    async fn test_converged_content_refreshes_revision() {
        let fx = linked("x").await;
        let revision = fx.remote.put_remote("/todo.txt", "same").await;
        let outcome = fx.engine.sync_content(Path::new(TODO), "same".to_string()).await.unwrap();
        assert_eq!(outcome, SyncOutcome::NoAction);
        let stored = fx.engine.refs().get(Path::new(TODO)).await.unwrap().unwrap();
        assert_eq!(stored.revision, revision);
        assert_eq!(stored.content_hash, content_hash(b"same"));
        assert_eq!(fx.resolver.calls(), 0);
    }

    #[tokio::test]
    async fn test_timestamp_conflict_without_hashes() {
        let remote = MockProvider::new(Provider::WebDav)
            .with_content_hashes(false)
            .with_revision_kind(RevisionKind::Timestamp);
        let fx = fixture(remote, [(TODO, "x")]).await;
        fx.engine.link_file(Path::new(TODO), Provider::WebDav, None).await.unwrap();
        fx.remote.put_remote("/todo.txt", "same").await;
        let outcome = fx.engine.sync_content(Path::new(TODO), "same".to_string()).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_syncs_share_one_attempt() {
        let fx = linked("x").await;
        fx.files.write(Path::new(TODO), "x\ny").await.unwrap();
        let requests = fx.remote.requests();
        let path = Path::new(TODO);
        let (first, second) = tokio::join!(fx.engine.sync_file(path), fx.engine.sync_file(path));
        let (first, second) = (first.unwrap(), second.unwrap());
        assert!(matches!(first, SyncOutcome::Pushed { .. }));
        assert_eq!(first, second);
        // One metadata lookup plus one upload.
        assert_eq!(fx.remote.requests() - requests, 2);
        assert_eq!(fx.remote.uploads(), 2);
    }

    #[tokio::test]
    async fn test_session_expired_reported_once() {
        let fx = linked("x").await;
        fx.remote.sign_out().await.unwrap();
        for _ in 0..2 {
            let err = fx.engine.sync_file(Path::new(TODO)).await.unwrap_err();
            assert_eq!(*err, ErrorKind::Unauthorized(Provider::Dropbox));
        }
        assert_eq!(fx.notifier.notes(), vec![Note::Expired(Provider::Dropbox)]);

        fx.engine.authenticate(Provider::Dropbox, &crate::testing::NoAuthorizer).await.unwrap();
        fx.remote.sign_out().await.unwrap();
        fx.engine.sync_file(Path::new(TODO)).await.unwrap_err();
        assert_eq!(fx.notifier.notes(), vec![Note::Expired(Provider::Dropbox), Note::Expired(Provider::Dropbox)]);
    }

    #[tokio::test]
    async fn test_network_errors_are_silent() {
        let fx = linked("x").await;
        fx.remote.fail_with(ProviderErrorKind::Network("offline".to_string())).await;
        let err = fx.engine.sync_file(Path::new(TODO)).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(fx.notifier.notes().is_empty());

        fx.remote.fail_with(ProviderErrorKind::Backend("500".to_string())).await;
        fx.engine.sync_file(Path::new(TODO)).await.unwrap_err();
        assert!(matches!(fx.notifier.notes().as_slice(), [Note::Failed(path, ErrorKind::Provider(_))] if path == Path::new(TODO)));
    }

    #[tokio::test]
    async fn test_failure_leaves_ref_untouched() {
        let fx = linked("x").await;
        let before = fx.engine.refs().get(Path::new(TODO)).await.unwrap();
        fx.remote.fail_with(ProviderErrorKind::Network("offline".to_string())).await;
        fx.engine.sync_content(Path::new(TODO), "changed".to_string()).await.unwrap_err();
        assert_eq!(fx.engine.refs().get(Path::new(TODO)).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_unlinked_file() {
        let fx = fixture(MockProvider::new(Provider::Dropbox), [(TODO, "x")]).await;
        let err = fx.engine.sync_file(Path::new(TODO)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotLinked(path) if path == Path::new(TODO)));
        assert_eq!(fx.remote.requests(), 0);
    }

    #[tokio::test]
    async fn test_import_file() {
        let remote = MockProvider::with_files(Provider::Dropbox, [("/lists/work.txt", "(B) report")]);
        let fx = fixture(remote, [("/tmp/placeholder", "")]).await;
        let local = Path::new("/home/me/work.txt");
        let outcome = fx.engine.import_file(local, Provider::Dropbox, "lists/work.txt").await.unwrap();
        assert!(matches!(&outcome, SyncOutcome::Pulled { content, .. } if content == "(B) report"));
        assert_eq!(fx.files.content(local).await.as_deref(), Some("(B) report"));
        assert_eq!(fx.engine.sync_file(local).await.unwrap(), SyncOutcome::NoAction);
    }

    #[tokio::test]
    async fn test_unlink_and_delete() {
        let fx = linked("x").await;
        assert!(fx.engine.unlink(Path::new(TODO)).await.unwrap());
        assert!(!fx.engine.unlink(Path::new(TODO)).await.unwrap());
        assert!(fx.remote.remote_content("/todo.txt").await.is_some());

        fx.remote.remove_remote("/todo.txt").await;
        fx.engine.link_file(Path::new(TODO), Provider::Dropbox, None).await.unwrap();
        fx.engine.delete_file(Path::new(TODO)).await.unwrap();
        assert!(fx.remote.remote_content("/todo.txt").await.is_none());
        assert!(fx.engine.refs().get(Path::new(TODO)).await.unwrap().is_none());
        assert!(fx.files.content(TODO).await.is_some());
    }

    #[tokio::test]
    async fn test_remove_provider() {
        let fx = linked("x").await;
        assert_eq!(fx.engine.remove_provider(Provider::Dropbox).await.unwrap(), 1);
        assert!(fx.engine.refs().list(None).await.unwrap().is_empty());
        assert!(!fx.remote.has_credentials().await.unwrap());
    }
}
