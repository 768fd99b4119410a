use crate::error::Result;
use crate::prefs::PreferenceStore;
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

pub const ARCHIVE_MODE_KEY: &str = "archive-mode";

/// How completed tasks are moved into the done file.
#[derive(Debug, Display, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveMode {
    #[default]
    #[display("no-archiving")]
    NoArchiving,
    #[display("manual")]
    Manual,
    #[display("automatic")]
    Automatic,
}
impl ArchiveMode {
    pub fn is_enabled(self) -> bool {
        !matches!(self, Self::NoArchiving)
    }
}

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
#[display("unknown archive mode: {_0}")]
pub struct UnknownArchiveMode(#[error(not(source))] pub String);

impl FromStr for ArchiveMode {
    type Err = UnknownArchiveMode;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "no-archiving" => Ok(Self::NoArchiving),
            "manual" => Ok(Self::Manual),
            "automatic" => Ok(Self::Automatic),
            other => Err(UnknownArchiveMode(other.to_string())),
        }
    }
}

/// Archive preference, stored next to the reference tables.
#[derive(Clone)]
pub struct ArchiveSettings {
    prefs: Arc<dyn PreferenceStore>,
}
impl ArchiveSettings {
    pub fn new(prefs: Arc<dyn PreferenceStore>) -> Self {
        Self { prefs }
    }

    /// Unknown or missing values fall back to [`ArchiveMode::NoArchiving`].
    pub async fn mode(&self) -> Result<ArchiveMode> {
        let Some(raw) = self.prefs.get_item(ARCHIVE_MODE_KEY).await? else {
            return Ok(ArchiveMode::default());
        };
        Ok(raw.parse().unwrap_or_else(|err: UnknownArchiveMode| {
            tracing::warn!(error = %err, "ignoring stored archive mode");
            ArchiveMode::default()
        }))
    }

    pub async fn set_mode(&self, mode: ArchiveMode) -> Result<()> {
        tracing::info!(%mode, "archive mode changed");
        self.prefs.set_item(ARCHIVE_MODE_KEY, &mode.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::MemoryPreferences;
    use rstest::rstest;

    #[rstest]
    #[case("no-archiving", ArchiveMode::NoArchiving)]
    #[case("manual", ArchiveMode::Manual)]
    #[case(" automatic\n", ArchiveMode::Automatic)]
    fn test_parse(#[case] input: &str, #[case] expected: ArchiveMode) {
        assert_eq!(input.parse::<ArchiveMode>().unwrap(), expected);
        assert_eq!(expected.to_string(), input.trim());
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!("weekly".parse::<ArchiveMode>(), Err(UnknownArchiveMode("weekly".to_string())));
    }

    #[tokio::test]
    async fn test_settings_round_trip() {
        let prefs = Arc::new(MemoryPreferences::default());
        let settings = ArchiveSettings::new(prefs.clone());
        assert_eq!(settings.mode().await.unwrap(), ArchiveMode::NoArchiving);
        settings.set_mode(ArchiveMode::Automatic).await.unwrap();
        assert_eq!(settings.mode().await.unwrap(), ArchiveMode::Automatic);
        assert_eq!(prefs.get_item(ARCHIVE_MODE_KEY).await.unwrap().as_deref(), Some("automatic"));
    }

    #[tokio::test]
    async fn test_settings_garbage_falls_back() {
        let prefs = Arc::new(MemoryPreferences::with_values([(ARCHIVE_MODE_KEY, "sometimes")]));
        let settings = ArchiveSettings::new(prefs);
        assert_eq!(settings.mode().await.unwrap(), ArchiveMode::NoArchiving);
    }
}
