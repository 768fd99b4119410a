//! Shared fixtures for the engine tests.

use crate::engine::SyncEngine;
use crate::error::ErrorKind;
use crate::hooks::{Conflict, ConflictResolver, Notifier, Resolution};
use crate::local::MemoryFiles;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use todosync_provider::adapter::MockProvider;
use todosync_provider::error::{ErrorKind as ProviderErrorKind, Result as ProviderResult};
use todosync_provider::{Authorizer, BasicCredentials, Provider};
use todosync_refs::MemoryPreferences;

pub(crate) struct Fixture {
    pub engine: SyncEngine,
    pub remote: Arc<MockProvider>,
    pub files: Arc<MemoryFiles>,
    pub prefs: Arc<MemoryPreferences>,
    pub resolver: Arc<ScriptedResolver>,
    pub notifier: Arc<RecordingNotifier>,
}

pub(crate) async fn fixture(
    remote: MockProvider,
    files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<String>)>,
) -> Fixture {
    fixture_with(remote, files, MemoryPreferences::default()).await
}

pub(crate) async fn fixture_with(
    remote: MockProvider,
    files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<String>)>,
    prefs: MemoryPreferences,
) -> Fixture {
    let remote = Arc::new(remote);
    let files = Arc::new(MemoryFiles::with_files(files));
    let prefs = Arc::new(prefs);
    let resolver = Arc::new(ScriptedResolver::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = SyncEngine::builder(prefs.clone())
        .adapter(remote.clone())
        .local_files(files.clone())
        .resolver(resolver.clone())
        .notifier(notifier.clone())
        .build()
        .await
        .unwrap();
    Fixture { engine, remote, files, prefs, resolver, notifier }
}

/// Answers every conflict the same way and counts how often it was asked.
#[derive(Default)]
pub(crate) struct ScriptedResolver {
    answer: Mutex<Option<Resolution>>,
    calls: AtomicUsize,
}
impl ScriptedResolver {
    pub fn answer(&self, answer: Option<Resolution>) {
        *self.answer.lock().unwrap() = answer;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConflictResolver for ScriptedResolver {
    async fn resolve(&self, _conflict: &Conflict) -> Option<Resolution> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.answer.lock().unwrap()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Note {
    Expired(Provider),
    Failed(PathBuf, ErrorKind),
    ArchiveEnabled,
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    notes: Mutex<Vec<Note>>,
}
impl RecordingNotifier {
    pub fn notes(&self) -> Vec<Note> {
        self.notes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn session_expired(&self, provider: Provider) {
        self.notes.lock().unwrap().push(Note::Expired(provider));
    }

    async fn sync_failed(&self, path: &Path, error: &ErrorKind) {
        self.notes.lock().unwrap().push(Note::Failed(path.to_path_buf(), error.clone()));
    }

    async fn archive_enabled(&self) {
        self.notes.lock().unwrap().push(Note::ArchiveEnabled);
    }
}

/// The mock provider never asks, so nothing needs answering.
pub(crate) struct NoAuthorizer;

#[async_trait]
impl Authorizer for NoAuthorizer {
    async fn authorization_code(&self, _provider: Provider, _url: &str) -> ProviderResult<String> {
        exn::bail!(ProviderErrorKind::Authorization("not interactive".to_string()))
    }

    async fn basic_credentials(&self, _provider: Provider) -> ProviderResult<BasicCredentials> {
        exn::bail!(ProviderErrorKind::Authorization("not interactive".to_string()))
    }
}
