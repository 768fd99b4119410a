pub mod adapter;
pub mod auth;
mod client;
pub mod credentials;
mod decide;
pub mod error;
mod hash;
mod models;
pub mod path;

pub use crate::adapter::{ProviderAdapter, SyncResult};
pub use crate::auth::{Authorizer, BasicCredentials};
pub use crate::client::ClientCache;
pub use crate::credentials::CredentialStore;
pub use crate::decide::{Decision, decide, format_timestamp, parse_timestamp, same_revision};
pub use crate::hash::{ContentHasher, content_hash};
pub use crate::models::{Baseline, ListPage, Provider, RemoteFile, RemoteItem, RevisionKind, UnknownProvider, UploadMode};
pub use crate::path::normalize as normalize_path;
use std::sync::Arc;

pub type AdapterHandle = Arc<dyn ProviderAdapter>;
