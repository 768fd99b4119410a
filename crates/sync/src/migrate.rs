//! Upgrade of the legacy `cloud-files` / `cloud-archive-files` tables.
//!
//! Legacy rows stored a revision under `rev`, the provider under
//! `cloudStorage`, and a checksum that is not comparable with today's content
//! hash. Hashes are therefore recomputed from the current local bytes; rows
//! whose local file is gone are dropped.

use crate::error::{ErrorKind, Result};
use crate::local::LocalFiles;
use crate::naming::FileNames;
use exn::ResultExt;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use todosync_provider::{Provider, content_hash};
use todosync_refs::{DoneFileRef, FileRef, PreferenceStore, RefStore};

pub const LEGACY_FILES_KEY: &str = "cloud-files";
pub const LEGACY_DONE_FILES_KEY: &str = "cloud-archive-files";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyRef {
    name: String,
    path: String,
    rev: String,
    #[serde(default)]
    last_sync: Option<String>,
    /// For done rows this is the *primary* file.
    local_file_path: PathBuf,
    cloud_storage: Provider,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub files: usize,
    pub done_files: usize,
    /// Local files that no longer exist, could not be read, or whose legacy
    /// row was malformed.
    pub skipped: Vec<PathBuf>,
    /// Malformed legacy rows, including those naming no local file.
    pub invalid: usize,
}
impl MigrationReport {
    pub fn is_empty(&self) -> bool {
        self.files == 0 && self.done_files == 0 && self.skipped.is_empty() && self.invalid == 0
    }
}

/// `None` when the key is absent. A table that isn't a JSON array counts as
/// empty; malformed rows are skipped one by one.
async fn load_legacy(prefs: &dyn PreferenceStore, key: &str, report: &mut MigrationReport) -> Result<Option<Vec<LegacyRef>>> {
    let Some(raw) = prefs.get_item(key).await.or_raise(|| ErrorKind::Migration)? else {
        return Ok(None);
    };
    let values: Vec<serde_json::Value> = match serde_json::from_str(&raw) {
        Ok(values) => values,
        Err(err) => {
            tracing::warn!(key, error = %err, "dropping unreadable legacy reference table");
            return Ok(Some(Vec::new()));
        },
    };
    let mut rows = Vec::with_capacity(values.len());
    for value in values {
        let local = value.get("localFilePath").and_then(serde_json::Value::as_str).map(PathBuf::from);
        match serde_json::from_value::<LegacyRef>(value) {
            Ok(row) => rows.push(row),
            Err(err) => {
                tracing::warn!(key, local = ?local, error = %err, "skipping malformed legacy reference");
                report.invalid += 1;
                report.skipped.extend(local);
            },
        }
    }
    Ok(Some(rows))
}

fn last_sync(value: Option<&str>) -> OffsetDateTime {
    value.and_then(|v| OffsetDateTime::parse(v, &Rfc3339).ok()).unwrap_or_else(OffsetDateTime::now_utc)
}

async fn current_hash(local: &dyn LocalFiles, path: &Path, report: &mut MigrationReport) -> Option<String> {
    match local.read(path).await {
        Ok(Some(content)) => Some(content_hash(content.as_bytes())),
        Ok(None) => {
            tracing::info!(path = %path.display(), "legacy ref points at a missing file, skipping");
            report.skipped.push(path.to_path_buf());
            None
        },
        Err(err) => {
            tracing::warn!(path = %path.display(), error = ?err, "could not read file for legacy ref, skipping");
            report.skipped.push(path.to_path_buf());
            None
        },
    }
}

/// Move legacy rows into the current tables. Does nothing when there are no
/// legacy keys; safe to call on every start.
#[tracing::instrument("migrating legacy file refs", skip_all)]
pub async fn migrate(refs: &RefStore, local: &dyn LocalFiles, names: &FileNames) -> Result<MigrationReport> {
    let prefs = refs.preferences().as_ref();
    let mut report = MigrationReport::default();
    let legacy_files = load_legacy(prefs, LEGACY_FILES_KEY, &mut report).await?;
    let legacy_done = load_legacy(prefs, LEGACY_DONE_FILES_KEY, &mut report).await?;
    if legacy_files.is_none() && legacy_done.is_none() {
        return Ok(report);
    }
    let legacy_files = legacy_files.unwrap_or_default();
    let legacy_done = legacy_done.unwrap_or_default();

    let mut file_refs = Vec::with_capacity(legacy_files.len());
    for row in &legacy_files {
        let Some(hash) = current_hash(local, &row.local_file_path, &mut report).await else {
            continue;
        };
        file_refs.push(FileRef {
            name: row.name.clone(),
            path: row.path.clone(),
            revision: row.rev.clone(),
            content_hash: hash,
            local_file_path: row.local_file_path.clone(),
            last_sync: last_sync(row.last_sync.as_deref()),
            provider: row.cloud_storage,
        });
    }

    let mut done_refs = Vec::with_capacity(legacy_done.len());
    for row in &legacy_done {
        let Some(done_path) = names.done_path(&row.local_file_path) else {
            report.skipped.push(row.local_file_path.clone());
            continue;
        };
        let Some(hash) = current_hash(local, &done_path, &mut report).await else {
            continue;
        };
        // Prefer the primary's sync time, the done row's is often stale.
        let primary_sync = legacy_files
            .iter()
            .find(|primary| primary.local_file_path == row.local_file_path)
            .and_then(|primary| primary.last_sync.as_deref());
        done_refs.push(DoneFileRef {
            name: row.name.clone(),
            path: row.path.clone(),
            revision: row.rev.clone(),
            content_hash: hash,
            local_file_path: row.local_file_path.clone(),
            last_sync: Some(last_sync(primary_sync.or(row.last_sync.as_deref()))),
            provider: row.cloud_storage,
        });
    }

    report.files = file_refs.len();
    report.done_files = done_refs.len();
    if !file_refs.is_empty() {
        refs.set_many(file_refs).await.or_raise(|| ErrorKind::Migration)?;
    }
    if !done_refs.is_empty() {
        refs.set_many_done(done_refs).await.or_raise(|| ErrorKind::Migration)?;
    }
    // Only now that the new tables are written.
    prefs.remove_item(LEGACY_FILES_KEY).await.or_raise(|| ErrorKind::Migration)?;
    prefs.remove_item(LEGACY_DONE_FILES_KEY).await.or_raise(|| ErrorKind::Migration)?;
    tracing::info!(files = report.files, done_files = report.done_files, skipped = report.skipped.len(), invalid = report.invalid, "migrated legacy file refs");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::MemoryFiles;
    use async_trait::async_trait;
    use std::sync::Arc;
    use todosync_refs::MemoryPreferences;
    use todosync_refs::error::{ErrorKind as RefsErrorKind, Result as RefsResult};

    const LEGACY_FILES: &str = r#"[
        {"name":"todo.txt","path":"/todo.txt","rev":"015a","contentHash":"old","lastSync":"2023-05-01T08:00:00Z",
         "localFilePath":"/home/me/todo.txt","cloudStorage":"Dropbox"},
        {"name":"gone.txt","path":"/gone.txt","rev":"9","contentHash":"old","lastSync":"2023-05-01T08:00:00Z",
         "localFilePath":"/home/me/gone.txt","cloudStorage":"WebDAV"}
    ]"#;
    const LEGACY_DONE: &str = r#"[
        {"name":"done.txt","path":"/done.txt","rev":"015b","contentHash":"old",
         "localFilePath":"/home/me/todo.txt","cloudStorage":"Dropbox"}
    ]"#;

    fn store(values: Vec<(&str, &str)>) -> (Arc<MemoryPreferences>, RefStore) {
        let prefs = Arc::new(MemoryPreferences::with_values(values));
        (prefs.clone(), RefStore::new(prefs))
    }

    #[tokio::test]
    async fn test_migrates_legacy_tables() {
        let (prefs, refs) = store(vec![(LEGACY_FILES_KEY, LEGACY_FILES), (LEGACY_DONE_FILES_KEY, LEGACY_DONE)]);
        let local = MemoryFiles::with_files([("/home/me/todo.txt", "(A) task"), ("/home/me/done.txt", "x done")]);
        let report = migrate(&refs, &local, &FileNames::default()).await.unwrap();

        assert_eq!(report.files, 1);
        assert_eq!(report.done_files, 1);
        assert_eq!(report.skipped, vec![PathBuf::from("/home/me/gone.txt")]);

        let file_ref = refs.get(Path::new("/home/me/todo.txt")).await.unwrap().unwrap();
        assert_eq!(file_ref.revision, "015a");
        assert_eq!(file_ref.content_hash, content_hash(b"(A) task"));
        assert_eq!(file_ref.provider, Provider::Dropbox);

        let done_ref = refs.get_done(Path::new("/home/me/todo.txt")).await.unwrap().unwrap();
        assert_eq!(done_ref.content_hash, content_hash(b"x done"));
        assert_eq!(done_ref.last_sync, Some(file_ref.last_sync));

        assert_eq!(prefs.get_item(LEGACY_FILES_KEY).await.unwrap(), None);
        assert_eq!(prefs.get_item(LEGACY_DONE_FILES_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_nothing_to_migrate() {
        let (prefs, refs) = store(vec![]);
        let report = migrate(&refs, &MemoryFiles::default(), &FileNames::default()).await.unwrap();
        assert!(report.is_empty());
        assert_eq!(prefs.writes(), 0);
    }

    #[tokio::test]
    async fn test_unreadable_legacy_data_is_dropped() {
        let (prefs, refs) = store(vec![(LEGACY_FILES_KEY, "not json")]);
        let report = migrate(&refs, &MemoryFiles::default(), &FileNames::default()).await.unwrap();
        assert!(report.is_empty());
        assert_eq!(prefs.get_item(LEGACY_FILES_KEY).await.unwrap(), None);
        assert!(refs.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_runs_on_engine_build() {
        use crate::testing::fixture_with;
        use todosync_provider::adapter::MockProvider;

        let prefs = MemoryPreferences::with_values([(LEGACY_FILES_KEY, LEGACY_FILES)]);
        let fx = fixture_with(MockProvider::new(Provider::Dropbox), [("/home/me/todo.txt", "(A) task")], prefs).await;
        assert_eq!(fx.engine.migration_report().files, 1);
        assert_eq!(fx.engine.refs().list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_rows_are_skipped_one_by_one() {
        let legacy = r#"[
            {"name":"todo.txt","path":"/todo.txt","rev":"015a","lastSync":"2023-05-01T08:00:00Z",
             "localFilePath":"/home/me/todo.txt","cloudStorage":"Dropbox"},
            {"name":"work.txt","path":"/work.txt","rev":"3",
             "localFilePath":"/home/me/work.txt","cloudStorage":"GoogleDrive"},
            {"name":"nowhere.txt","path":"/nowhere.txt"}
        ]"#;
        let (prefs, refs) = store(vec![(LEGACY_FILES_KEY, legacy)]);
        let local = MemoryFiles::with_files([("/home/me/todo.txt", "(A) task"), ("/home/me/work.txt", "(B) work")]);
        let report = migrate(&refs, &local, &FileNames::default()).await.unwrap();

        assert_eq!(report.files, 1);
        assert_eq!(report.invalid, 2);
        assert_eq!(report.skipped, vec![PathBuf::from("/home/me/work.txt")]);
        let file_ref = refs.get(Path::new("/home/me/todo.txt")).await.unwrap().unwrap();
        assert_eq!(file_ref.revision, "015a");
        assert_eq!(refs.list(None).await.unwrap().len(), 1);
        assert_eq!(prefs.get_item(LEGACY_FILES_KEY).await.unwrap(), None);
    }

    /// Memory preferences that refuse to delete anything.
    #[derive(Default)]
    struct StickyPreferences(MemoryPreferences);

    #[async_trait]
    impl PreferenceStore for StickyPreferences {
        async fn get_item(&self, key: &str) -> RefsResult<Option<String>> {
            self.0.get_item(key).await
        }

        async fn set_item(&self, key: &str, value: &str) -> RefsResult<()> {
            self.0.set_item(key, value).await
        }

        async fn remove_item(&self, _key: &str) -> RefsResult<()> {
            exn::bail!(RefsErrorKind::Preferences)
        }
    }

    fn sticky() -> Arc<StickyPreferences> {
        Arc::new(StickyPreferences(MemoryPreferences::with_values([(LEGACY_FILES_KEY, LEGACY_FILES)])))
    }

    #[tokio::test]
    async fn test_store_failure_is_a_migration_error() {
        let prefs = sticky();
        let refs = RefStore::new(prefs.clone());
        let local = MemoryFiles::with_files([("/home/me/todo.txt", "(A) task")]);
        let err = migrate(&refs, &local, &FileNames::default()).await.unwrap_err();
        assert_eq!(*err, ErrorKind::Migration);
        // Legacy data stays for the next start.
        assert!(prefs.get_item(LEGACY_FILES_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_migration_does_not_stop_engine_build() {
        use crate::engine::SyncEngine;

        let engine = SyncEngine::builder(sticky())
            .local_files(Arc::new(MemoryFiles::with_files([("/home/me/todo.txt", "(A) task")])))
            .build()
            .await
            .unwrap();
        assert!(engine.migration_report().is_empty());
        assert!(engine.refs().get(Path::new("/home/me/todo.txt")).await.unwrap().is_some());
    }
}
