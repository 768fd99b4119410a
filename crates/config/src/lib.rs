//! Layered configuration.
//!
//! Sources, lowest priority first:
//! 1. Built-in defaults.
//! 2. `config.toml`, `config.yaml` and `config.json` in the user's
//!    configuration directory, whichever exist.
//! 3. An explicitly given file (format picked by its extension).
//! 4. `TODOSYNC_*` environment variables, with `__` separating nested keys
//!    (`TODOSYNC_SYNC__CONCURRENCY=8`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::{OptionExt, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "TODOSYNC_";
const PREFERENCES_FILE: &str = "preferences.json";
const CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Where preferences (file references, settings) and credentials live.
    pub data_dir: PathBuf,
    pub names: Names,
    pub sync: SyncConfig,
    pub dropbox: DropboxConfig,
    pub webdav: WebDavConfig,
}

/// Expected names of task list files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Names {
    pub todo: String,
    pub done: String,
}
impl Default for Names {
    fn default() -> Self {
        Self { todo: "todo.txt".to_string(), done: "done.txt".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// A background sync is skipped if any file was synced more recently.
    pub stale_after_secs: u64,
    pub concurrency: usize,
}
impl Default for SyncConfig {
    fn default() -> Self {
        Self { stale_after_secs: 120, concurrency: 4 }
    }
}
impl SyncConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropboxConfig {
    /// OAuth client id of the registered Dropbox app. Dropbox is unavailable
    /// without one.
    pub app_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebDavConfig {
    /// Offered as the server address when signing in.
    pub url: Option<String>,
}

impl Config {
    fn defaults(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            names: Names::default(),
            sync: SyncConfig::default(),
            dropbox: DropboxConfig::default(),
            webdav: WebDavConfig::default(),
        }
    }

    /// Load from the platform's configuration directory, `explicit` and the
    /// environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let dirs = ProjectDirs::from("", "", "todosync").ok_or_raise(|| ErrorKind::NoHomeDirectory)?;
        Self::load_in(dirs.config_dir(), dirs.data_dir(), explicit)
    }

    /// Like [`load`](Self::load), with the directories spelled out.
    #[tracing::instrument(skip_all, fields(config_dir = %config_dir.display()))]
    pub fn load_in(config_dir: &Path, data_dir: &Path, explicit: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::defaults(data_dir.to_path_buf())))
            .merge(Toml::file(config_dir.join("config.toml")))
            .merge(Yaml::file(config_dir.join("config.yaml")))
            .merge(Json::file(config_dir.join("config.json")));
        if let Some(path) = explicit {
            tracing::debug!(path = %path.display(), "merging configuration file");
            figment = match path.extension().and_then(|ext| ext.to_str()) {
                Some("toml") => figment.merge(Toml::file_exact(path)),
                Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
                Some("json") => figment.merge(Json::file_exact(path)),
                _ => exn::bail!(ErrorKind::UnsupportedFormat(path.display().to_string())),
            };
        }
        let config: Self = figment.merge(Env::prefixed(ENV_PREFIX).split("__")).extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.sync.concurrency == 0 {
            exn::bail!(ErrorKind::Invalid("sync.concurrency must be at least 1".to_string()));
        }
        for (key, name) in [("names.todo", &self.names.todo), ("names.done", &self.names.done)] {
            if name.is_empty() || name.contains(['/', '\\']) {
                exn::bail!(ErrorKind::Invalid(format!("{key} must be a plain file name")));
            }
        }
        Ok(())
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.data_dir.join(PREFERENCES_FILE)
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.data_dir.join(CREDENTIALS_FILE)
    }
}
