//! Persistent reference tables for linked files.
//!
//! A [`FileRef`] records where a local file lives remotely and the revision
//! and content hash at the last successful sync; that baseline is what the
//! sync engine compares against. Done files get their own table of
//! [`DoneFileRef`]s keyed by the primary file.

pub mod error;
mod models;
mod prefs;
mod settings;
mod store;

pub use crate::models::{DoneFileRef, FileRef};
pub use crate::prefs::{JsonFilePreferences, MemoryPreferences, PreferenceStore};
pub use crate::settings::{ARCHIVE_MODE_KEY, ArchiveMode, ArchiveSettings, UnknownArchiveMode};
pub use crate::store::{DONE_FILE_REFS_KEY, FILE_REFS_KEY, RefStore};
