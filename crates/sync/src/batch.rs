use crate::engine::{SyncEngine, SyncOutcome};
use crate::error::{ErrorKind, Result};
use async_stream::stream;
use exn::ResultExt;
use futures::stream::FuturesUnordered;
use futures::{Stream, StreamExt};
use std::path::PathBuf;
use time::OffsetDateTime;

/// Progress events emitted by [`SyncEngine::sync_all`].
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started) exactly once.
/// 2. [`DiscoveryComplete`](Self::DiscoveryComplete) exactly once, with the
///    number of linked files about to be synced.
/// 3. [`Synced`](Self::Synced) or [`Failed`](Self::Failed) once per linked
///    file, in completion order, then once per done file that was touched.
/// 4. [`Complete`](Self::Complete) exactly once.
///
/// Only failing to read the reference tables ends the stream early, as an
/// `Err` item; [`Complete`](Self::Complete) is then never emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Started,
    DiscoveryComplete(u64),
    Synced { path: PathBuf, outcome: SyncOutcome },
    Failed { path: PathBuf, error: ErrorKind },
    Complete,
}

impl SyncEngine {
    /// Sync every linked file, then reconcile their done files.
    ///
    /// Files are synced concurrently up to [`SyncSettings::concurrency`] at a
    /// time. With `only_when_outdated`, nothing happens unless every linked
    /// file was last synced longer than [`SyncSettings::stale_after`] ago.
    ///
    /// [`SyncSettings::concurrency`]: crate::SyncSettings::concurrency
    /// [`SyncSettings::stale_after`]: crate::SyncSettings::stale_after
    pub fn sync_all(&self, only_when_outdated: bool) -> impl Stream<Item = Result<SyncEvent>> + '_ {
        // `rustfmt` does not format macros that use braces. Wrap in parentheses!
        stream!({
            yield Ok(SyncEvent::Started);

            let file_refs = match self.refs().list(None).await.or_raise(|| ErrorKind::Refs) {
                Ok(refs) => refs,
                Err(e) => {
                    yield Err(e);
                    return;
                },
            };
            let cutoff = OffsetDateTime::now_utc() - self.settings().stale_after;
            if only_when_outdated && file_refs.iter().any(|file_ref| file_ref.last_sync > cutoff) {
                tracing::debug!(files = file_refs.len(), "synced recently, skipping");
                yield Ok(SyncEvent::DiscoveryComplete(0));
                yield Ok(SyncEvent::Complete);
                return;
            }
            // Infallible: a usize (either 32- or 64-bit) will always fit in a u64.
            yield Ok(SyncEvent::DiscoveryComplete(u64::try_from(file_refs.len()).unwrap_or(0)));

            let primaries: Vec<PathBuf> = file_refs.into_iter().map(|file_ref| file_ref.local_file_path).collect();
            let mut futures: Vec<_> = primaries
                .iter()
                .cloned()
                .map(|path| async move {
                    let result = self.sync_file(&path).await;
                    (path, result)
                })
                .collect();
            let mut processing = FuturesUnordered::new();
            processing.extend(futures.drain(..self.settings().concurrency.max(1).min(futures.len())));
            while let Some((path, result)) = processing.next().await {
                yield Ok(match result {
                    Ok(outcome) => SyncEvent::Synced { path, outcome },
                    Err(err) => SyncEvent::Failed { path, error: (*err).clone() },
                });
                // Pop-n-push, but FIFO instead of LIFO.
                if !futures.is_empty() {
                    processing.push(futures.remove(0));
                }
            }

            match self.sync_done_files(&primaries).await {
                Ok(report) => {
                    for (path, outcome) in report.synced {
                        yield Ok(SyncEvent::Synced { path, outcome });
                    }
                    for (path, error) in report.failed {
                        yield Ok(SyncEvent::Failed { path, error });
                    }
                },
                Err(e) => {
                    yield Err(e);
                    return;
                },
            }

            yield Ok(SyncEvent::Complete);
        })
    }
}
