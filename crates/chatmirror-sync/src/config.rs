use std::path::{Path, PathBuf};

use chatmirror_protocol::ChannelId;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tuning for the sync engine and loop. Every field has a default, so an
/// empty JSON object is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Most envelopes applied in one unit of work.
    pub batch_size: usize,
    /// Capacity of the inbound envelope channel.
    pub event_buffer: usize,
    /// Capacity of the notification broadcast channel.
    pub notification_capacity: usize,
    /// Channel assumed for channel-scoped events that carry no `cid`.
    pub default_channel: Option<ChannelId>,
    /// `SQLite` database file; `None` keeps everything in memory.
    pub database_path: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            event_buffer: 1024,
            notification_capacity: 256,
            default_channel: None,
            database_path: None,
        }
    }
}

impl SyncConfig {
    /// Load a JSON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid("event_buffer must be at least 1".into()));
        }
        if self.notification_capacity == 0 {
            return Err(ConfigError::Invalid(
                "notification_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"batch_size": 8, "default_channel": "messaging:general"}}"#).unwrap();

        let config = SyncConfig::load(file.path()).unwrap();
        assert_eq!(config.batch_size, 8);
        assert_eq!(config.event_buffer, 1024);
        assert_eq!(
            config.default_channel,
            Some(ChannelId::from("messaging:general"))
        );
    }

    #[test]
    fn zero_batch_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"batch_size": 0}}"#).unwrap();

        assert!(matches!(
            SyncConfig::load(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "batch_size = 3").unwrap();

        assert!(matches!(
            SyncConfig::load(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }
}
