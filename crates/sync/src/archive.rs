//! Done files: the archive of completed tasks kept next to each task list.
//!
//! A done file is synced like any other linked file, but its link lives in
//! the done table, keyed by the primary file. Finding or losing a done file
//! remotely also flips the archive mode so that every device ends up agreeing
//! on whether archiving is on.

use crate::engine::{SyncEngine, SyncOutcome, Tracked, found, ignore_missing};
use crate::error::{ErrorKind, ProviderResultExt, Result};
use crate::local::LocalFiles;
use exn::{OptionExt, ResultExt};
use std::path::{Path, PathBuf};
use todosync_provider::{RemoteFile, UploadMode, content_hash};
use todosync_refs::{ArchiveMode, DoneFileRef, FileRef};

/// What [`SyncEngine::sync_done_files`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DoneFilesReport {
    /// Done files (local path) that were synced, linked or downloaded.
    pub synced: Vec<(PathBuf, SyncOutcome)>,
    /// Done files deleted locally because their remote copy is gone.
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, ErrorKind)>,
    /// New archive mode, if it was changed.
    pub mode: Option<ArchiveMode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Vote {
    Enable,
    Disable,
    Keep,
}

/// A task list split into lines, remembering how to put it back together.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TaskLines {
    lines: Vec<String>,
    ending: &'static str,
    trailing: bool,
}
impl TaskLines {
    fn parse(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
            ending: if text.contains("\r\n") { "\r\n" } else { "\n" },
            trailing: text.ends_with('\n'),
        }
    }

    /// Empty list using the same line ending conventions as `text`.
    fn empty_like(text: &str) -> Self {
        Self { lines: Vec::new(), ..Self::parse(text) }
    }

    fn push_all(&mut self, lines: impl IntoIterator<Item = String>) {
        while self.lines.last().is_some_and(|line| line.trim().is_empty()) {
            self.lines.pop();
        }
        self.lines.extend(lines);
    }

    fn is_blank(&self) -> bool {
        self.lines.iter().all(|line| line.trim().is_empty())
    }

    fn render(&self) -> String {
        let mut text = self.lines.join(self.ending);
        if self.trailing && !self.lines.is_empty() {
            text.push_str(self.ending);
        }
        text
    }
}

impl SyncEngine {
    /// Local done file belonging to `primary`, if its name allows one.
    pub fn done_path(&self, primary: &Path) -> Option<PathBuf> {
        self.settings().names.done_path(primary)
    }

    /// Reconcile the done file of every linked primary with its remote copy,
    /// then adjust the archive mode.
    ///
    /// Any done file found remotely while archiving is off turns archiving on
    /// (`manual`). If every primary reports its done file gone while
    /// archiving is on, archiving is turned off.
    #[tracing::instrument(skip_all, fields(primaries = primaries.len()))]
    pub async fn sync_done_files(&self, primaries: &[PathBuf]) -> Result<DoneFilesReport> {
        let mode = self.archive_settings().mode().await.or_raise(|| ErrorKind::Refs)?;
        let mut report = DoneFilesReport::default();
        let mut votes = Vec::with_capacity(primaries.len());
        for primary in primaries {
            let Some(done_local) = self.done_path(primary) else {
                continue;
            };
            match self.reconcile_done(primary, &done_local, mode, &mut report).await {
                Ok(Some(vote)) => votes.push(vote),
                Ok(None) => {},
                Err(err) => {
                    let kind = (*err).clone();
                    self.report(&done_local, &kind).await;
                    report.failed.push((done_local, kind));
                },
            }
        }

        if votes.contains(&Vote::Enable) {
            self.archive_settings().set_mode(ArchiveMode::Manual).await.or_raise(|| ErrorKind::Refs)?;
            self.notifier().archive_enabled().await;
            report.mode = Some(ArchiveMode::Manual);
        } else if !votes.is_empty() && votes.iter().all(|vote| *vote == Vote::Disable) {
            self.archive_settings().set_mode(ArchiveMode::NoArchiving).await.or_raise(|| ErrorKind::Refs)?;
            report.mode = Some(ArchiveMode::NoArchiving);
        }
        Ok(report)
    }

    async fn reconcile_done(
        &self,
        primary: &Path,
        done_local: &Path,
        mode: ArchiveMode,
        report: &mut DoneFilesReport,
    ) -> Result<Option<Vote>> {
        let Some(primary_ref) = self.refs().get(primary).await.or_raise(|| ErrorKind::Refs)? else {
            return Ok(None);
        };
        let provider = primary_ref.provider;
        let adapter = self.adapter(provider)?;
        let enabled = mode.is_enabled();
        let done_ref = self.refs().get_done(primary).await.or_raise(|| ErrorKind::Refs)?;
        let remote_path = match (&done_ref, self.settings().names.done_remote_path(&primary_ref.path)) {
            (Some(done_ref), _) => done_ref.path.clone(),
            (None, Some(path)) => path,
            (None, None) => return Ok(None),
        };
        let remote = found(adapter.get_metadata(&remote_path).await).classify(provider)?;
        let local_content = self.local_files().read(done_local).await?;

        let vote = match (done_ref, remote) {
            (Some(_), None) => {
                tracing::info!(done = %done_local.display(), "done file was deleted remotely, removing local copy");
                self.local_files().delete(done_local).await?;
                self.refs().remove_done(primary).await.or_raise(|| ErrorKind::Refs)?;
                report.removed.push(done_local.to_path_buf());
                if enabled { Vote::Disable } else { Vote::Keep }
            },
            (Some(done_ref), Some(remote)) => {
                let vote = if enabled { Vote::Keep } else { Vote::Enable };
                let outcome = match local_content {
                    Some(_) => match self.sync_file(done_local).await {
                        Ok(outcome) => outcome,
                        // Already reported by the sync itself.
                        Err(err) => {
                            report.failed.push((done_local.to_path_buf(), (*err).clone()));
                            return Ok(Some(vote));
                        },
                    },
                    None => {
                        let tracked = Tracked::Done { primary: primary.to_path_buf(), done_ref };
                        self.adopt_remote(done_local, &tracked, remote).await?
                    },
                };
                report.synced.push((done_local.to_path_buf(), outcome));
                vote
            },
            (None, Some(remote)) => {
                // Nothing was ever agreed on, so any local copy differs unless
                // the bytes happen to match.
                let tracked = Tracked::Done {
                    primary: primary.to_path_buf(),
                    done_ref: DoneFileRef {
                        name: remote.name.clone(),
                        path: remote.path.clone(),
                        revision: String::new(),
                        content_hash: String::new(),
                        local_file_path: primary.to_path_buf(),
                        last_sync: None,
                        provider,
                    },
                };
                let outcome = match local_content {
                    None => self.adopt_remote(done_local, &tracked, remote).await?,
                    Some(content) if remote.content_hash.as_deref() == Some(content_hash(content.as_bytes()).as_str()) => {
                        self.record(done_local, &tracked, &remote, &content).await?;
                        SyncOutcome::NoAction
                    },
                    Some(content) => self.resolve(done_local, &tracked, remote, content).await?,
                };
                report.synced.push((done_local.to_path_buf(), outcome));
                if enabled { Vote::Keep } else { Vote::Enable }
            },
            (None, None) => match local_content {
                Some(content) if enabled => {
                    let remote = adapter.upload_file(&remote_path, &content, UploadMode::Create).await.classify(provider)?;
                    let new_ref = self.store_done(primary, done_local, &remote, &content).await?;
                    report.synced.push((done_local.to_path_buf(), SyncOutcome::Pushed { new_ref }));
                    Vote::Keep
                },
                // Never archived anything: no evidence either way.
                _ => Vote::Keep,
            },
        };
        Ok(Some(vote))
    }

    /// Download `remote` over the local done file and adopt its metadata.
    async fn adopt_remote(&self, done_local: &Path, tracked: &Tracked, remote: RemoteFile) -> Result<SyncOutcome> {
        let Tracked::Done { done_ref, .. } = tracked else {
            exn::bail!(ErrorKind::NotLinked(done_local.to_path_buf()));
        };
        let content = self.adapter(done_ref.provider)?.download_file(&remote.path).await.classify(done_ref.provider)?;
        self.write_local(done_local, &content).await?;
        let new_ref = self.record(done_local, tracked, &remote, &content).await?;
        tracing::info!(done = %done_local.display(), revision = %remote.revision, "downloaded done file");
        Ok(SyncOutcome::Pulled { new_ref, content })
    }

    async fn store_done(&self, primary: &Path, done_local: &Path, remote: &RemoteFile, content: &str) -> Result<FileRef> {
        let primary_ref = self
            .refs()
            .get(primary)
            .await
            .or_raise(|| ErrorKind::Refs)?
            .ok_or_raise(|| ErrorKind::NotLinked(primary.to_path_buf()))?;
        let hash = content_hash(content.as_bytes());
        let done_ref = DoneFileRef::new(primary, primary_ref.provider, remote, hash.clone());
        self.refs().set_done(done_ref).await.or_raise(|| ErrorKind::Refs)?;
        Ok(FileRef::new(done_local, primary_ref.provider, remote, hash))
    }

    /// Upload the local done file of a linked primary for the first time.
    pub async fn link_done_file(&self, primary: &Path) -> Result<SyncOutcome> {
        let primary_ref = self
            .refs()
            .get(primary)
            .await
            .or_raise(|| ErrorKind::Refs)?
            .ok_or_raise(|| ErrorKind::NotLinked(primary.to_path_buf()))?;
        let done_local = self.done_path(primary).ok_or_raise(|| ErrorKind::Local(primary.to_path_buf()))?;
        let remote_path = self
            .settings()
            .names
            .done_remote_path(&primary_ref.path)
            .ok_or_raise(|| ErrorKind::NotFound(primary_ref.path.clone()))?;
        let content = self.read_local(&done_local).await?;
        let provider = primary_ref.provider;
        let remote = self
            .adapter(provider)?
            .upload_file(&remote_path, &content, UploadMode::Create)
            .await
            .classify(provider)?;
        let new_ref = self.store_done(primary, &done_local, &remote, &content).await?;
        tracing::info!(done = %done_local.display(), path = %remote.path, "linked done file");
        Ok(SyncOutcome::Pushed { new_ref })
    }

    /// Push a locally edited done file, linking it first if needed. `None`
    /// when the primary isn't linked.
    pub(crate) async fn sync_done(&self, primary: &Path) -> Result<Option<SyncOutcome>> {
        if self.refs().get(primary).await.or_raise(|| ErrorKind::Refs)?.is_none() {
            return Ok(None);
        }
        let done_local = self.done_path(primary).ok_or_raise(|| ErrorKind::Local(primary.to_path_buf()))?;
        if self.refs().get_done(primary).await.or_raise(|| ErrorKind::Refs)?.is_some() {
            return self.sync_file(&done_local).await.map(Some);
        }
        match self.link_done_file(primary).await {
            // Another device already created one; reconcile through the
            // regular path, which may ask the resolver.
            Err(err) if matches!(&*err, ErrorKind::Conflict(_)) => {
                let report = self.sync_done_files(&[primary.to_path_buf()]).await?;
                Ok(report.synced.into_iter().next().map(|(_, outcome)| outcome))
            },
            other => other.map(Some),
        }
    }

    /// Move `lines` into the done file of `primary`, then sync it.
    ///
    /// The done file is re-read from disk first so that archiving from two
    /// places never loses lines. Removing the lines from the primary is the
    /// caller's business.
    #[tracing::instrument(skip_all, fields(primary = %primary.display(), count = lines.len()))]
    pub async fn archive_tasks(&self, primary: &Path, lines: &[String]) -> Result<Option<SyncOutcome>> {
        if lines.is_empty() {
            return Ok(None);
        }
        let done_local = self.done_path(primary).ok_or_raise(|| ErrorKind::Local(primary.to_path_buf()))?;
        let mut done = match self.local_files().read(&done_local).await? {
            Some(text) if !text.is_empty() => TaskLines::parse(&text),
            _ => TaskLines::empty_like(&self.local_files().read(primary).await?.unwrap_or_default()),
        };
        done.push_all(lines.iter().cloned());
        self.write_local(&done_local, &done.render()).await?;
        tracing::info!("archived tasks");
        self.sync_done(primary).await
    }

    /// Move one archived task back into the primary. Returns `false` if the
    /// line isn't in the done file.
    #[tracing::instrument(skip_all, fields(primary = %primary.display()))]
    pub async fn restore_task(&self, primary: &Path, line: &str) -> Result<bool> {
        let done_local = self.done_path(primary).ok_or_raise(|| ErrorKind::Local(primary.to_path_buf()))?;
        let Some(text) = self.local_files().read(&done_local).await? else {
            return Ok(false);
        };
        let mut done = TaskLines::parse(&text);
        let Some(index) = done.lines.iter().position(|candidate| candidate == line) else {
            return Ok(false);
        };
        let restored = done.lines.remove(index);
        if done.is_blank() {
            self.drop_remote_done(primary).await?;
            let content = self.append_to_primary(primary, vec![restored]).await?;
            self.delete_local_done(&done_local).await?;
            self.sync_primary(primary, content).await?;
        } else {
            let content = self.append_to_primary(primary, vec![restored]).await?;
            self.write_local(&done_local, &done.render()).await?;
            self.sync_primary(primary, content).await?;
            self.sync_done(primary).await?;
        }
        Ok(true)
    }

    /// Move every archived task back into the primary and delete the done
    /// file everywhere. Returns how many tasks were restored.
    ///
    /// The remote copy goes first: if that fails nothing has moved yet.
    #[tracing::instrument(skip_all, fields(primary = %primary.display()))]
    pub async fn restore_all(&self, primary: &Path) -> Result<usize> {
        let done_local = self.done_path(primary).ok_or_raise(|| ErrorKind::Local(primary.to_path_buf()))?;
        let Some(text) = self.local_files().read(&done_local).await? else {
            return Ok(0);
        };
        let restored: Vec<String> = TaskLines::parse(&text).lines.into_iter().filter(|line| !line.trim().is_empty()).collect();
        let count = restored.len();
        self.drop_remote_done(primary).await?;
        let content = self.append_to_primary(primary, restored).await?;
        self.delete_local_done(&done_local).await?;
        self.sync_primary(primary, content).await?;
        Ok(count)
    }

    /// Append `lines` to the local primary and return its new content.
    async fn append_to_primary(&self, primary: &Path, lines: Vec<String>) -> Result<String> {
        let mut tasks = TaskLines::parse(&self.local_files().read(primary).await?.unwrap_or_default());
        tasks.push_all(lines);
        let content = tasks.render();
        self.write_local(primary, &content).await?;
        Ok(content)
    }

    async fn sync_primary(&self, primary: &Path, content: String) -> Result<()> {
        if self.refs().get(primary).await.or_raise(|| ErrorKind::Refs)?.is_some() {
            self.sync_content(primary, content).await?;
        }
        Ok(())
    }

    /// Delete the remote done file and forget its link. The link survives a
    /// failed delete so the next reconciliation still sees it.
    async fn drop_remote_done(&self, primary: &Path) -> Result<()> {
        if let Some(done_ref) = self.refs().get_done(primary).await.or_raise(|| ErrorKind::Refs)? {
            let adapter = self.adapter(done_ref.provider)?;
            ignore_missing(adapter.delete_file(&done_ref.path).await).classify(done_ref.provider)?;
            self.refs().remove_done(primary).await.or_raise(|| ErrorKind::Refs)?;
        }
        Ok(())
    }

    async fn delete_local_done(&self, done_local: &Path) -> Result<()> {
        self.local_files().delete(done_local).await?;
        tracing::info!(done = %done_local.display(), "deleted done file");
        Ok(())
    }
}
