//! Configuration for the monitor.

use crate::core::buffer::DEFAULT_CAPACITY;
use crate::core::search::{SearchIndex, DEFAULT_DEBOUNCE, DEFAULT_LIMIT};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default stream endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8090/api/events/stream";

/// Main configuration for the monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// URL of the server-sent event stream
    pub endpoint: String,

    /// Number of records kept in the window
    pub buffer_capacity: usize,

    /// Search behaviour
    pub search: SearchConfig,

    /// Pause before a closed subscription is replaced; zero replaces it at once
    #[serde(with = "duration_ms")]
    pub reconnect_delay: Duration,

    /// Bound on the HTTP connect phase
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,

    /// IANA timezone for chart time labels
    pub timezone: String,

    /// Whether ingestion is currently paused
    pub paused: bool,

    /// Default operator display name
    pub operator: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            buffer_capacity: DEFAULT_CAPACITY,
            search: SearchConfig::default(),
            reconnect_delay: Duration::ZERO,
            connect_timeout: Duration::from_secs(10),
            timezone: "UTC".to_string(),
            paused: false,
            operator: None,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, or defaults if it does not exist.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pulse-monitor")
            .join("config.json")
    }

    /// Where the CLI keeps the counters of the last finished session.
    pub fn last_session_path() -> PathBuf {
        Self::config_path().with_file_name("last_session.json")
    }

    /// Chart timezone, falling back to UTC for unknown names.
    pub fn timezone(&self) -> Tz {
        match self.timezone.parse::<Tz>() {
            Ok(tz) => tz,
            Err(_) => {
                tracing::warn!(timezone = %self.timezone, "unknown timezone, using UTC");
                Tz::UTC
            }
        }
    }

    pub fn search_index(&self) -> SearchIndex {
        SearchIndex::new(self.search.limit, self.search.min_query_len)
    }
}

/// Search settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Maximum results per query
    pub limit: usize,

    /// Quiet period before a query runs
    #[serde(with = "duration_ms")]
    pub debounce: Duration,

    /// Shortest query that runs
    pub min_query_len: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            debounce: DEFAULT_DEBOUNCE,
            min_query_len: 1,
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration as whole milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.buffer_capacity, 100);
        assert_eq!(config.search.limit, 10);
        assert_eq!(config.search.debounce, Duration::from_millis(300));
        assert_eq!(config.timezone(), Tz::UTC);
        assert_eq!(config.reconnect_delay, Duration::ZERO);
        assert!(!config.paused);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"endpoint": "http://example.test/stream", "reconnect_delay": 250}"#,
        )
        .unwrap();
        assert_eq!(config.endpoint, "http://example.test/stream");
        assert_eq!(config.reconnect_delay, Duration::from_millis(250));
        assert_eq!(config.buffer_capacity, DEFAULT_CAPACITY);
    }

    #[test]
    fn test_unknown_timezone_falls_back() {
        let config = Config {
            timezone: "Mars/Olympus_Mons".to_string(),
            ..Config::default()
        };
        assert_eq!(config.timezone(), Tz::UTC);

        let config = Config {
            timezone: "Europe/Berlin".to_string(),
            ..Config::default()
        };
        assert_eq!(config.timezone(), chrono_tz::Europe::Berlin);
    }

    #[test]
    fn test_save_and_load_roundtrip_through_file() {
        let path = std::env::temp_dir()
            .join(format!("pulse-monitor-config-{}", uuid::Uuid::new_v4()))
            .join("config.json");
        let config = Config {
            paused: true,
            operator: Some("admin".to_string()),
            ..Config::default()
        };

        config.save_to(&path).unwrap();
        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);

        if let Some(parent) = path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }
}
