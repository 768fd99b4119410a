//! Keeps local todo.txt files and their done files in step with a cloud
//! provider.
//!
//! [`SyncEngine`] compares each linked file against the baseline stored at
//! the last successful sync and pushes, pulls or asks a
//! [`ConflictResolver`] accordingly.

mod archive;
mod batch;
mod engine;
pub mod error;
mod events;
mod hooks;
mod local;
pub mod migrate;
mod naming;
#[cfg(test)]
mod testing;

pub use crate::archive::DoneFilesReport;
pub use crate::batch::SyncEvent;
pub use crate::engine::{DEFAULT_CONCURRENCY, DEFAULT_STALE_AFTER, SyncEngine, SyncEngineBuilder, SyncOutcome, SyncSettings};
pub use crate::events::FileEvent;
pub use crate::hooks::{Conflict, ConflictResolver, DismissConflicts, LogNotifier, Notifier, Resolution};
pub use crate::local::{DiskFiles, LocalFiles, MemoryFiles};
pub use crate::migrate::MigrationReport;
pub use crate::naming::FileNames;
