//! Configuration loading for dmsync-relay.
//!
//! Configuration is loaded from a TOML file (default: `relay.toml`).
//! Every section and field is optional.

use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration for dmsync-relay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Change feed configuration.
    #[serde(default)]
    pub feed: FeedConfig,
    /// HTTP endpoints configuration.
    #[serde(default)]
    pub http: HttpConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
    /// Maximum pooled connections (default: 10).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

/// Change feed configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Events a subscriber may fall behind before it must resync (default: 1024).
    #[serde(default = "default_feed_capacity")]
    pub capacity: usize,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Bind address for HTTP server (default: 0.0.0.0:8080).
    #[serde(default = "default_http_bind")]
    pub bind_address: String,
    /// Enable metrics endpoint (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

// Default value functions
fn default_database_path() -> PathBuf {
    PathBuf::from("dmsync.db")
}

fn default_max_connections() -> u32 {
    10
}

fn default_feed_capacity() -> usize {
    dmsync_client::DEFAULT_FEED_CAPACITY
}

fn default_http_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            capacity: default_feed_capacity(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_http_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.storage.database, PathBuf::from("dmsync.db"));
        assert_eq!(config.storage.max_connections, 10);
        assert_eq!(config.feed.capacity, 1024);
        assert!(config.http.metrics_enabled);
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[storage]
database = "/data/dm.db"
max_connections = 4

[feed]
capacity = 64

[http]
bind_address = "127.0.0.1:9090"
metrics_enabled = false
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.storage.database, PathBuf::from("/data/dm.db"));
        assert_eq!(config.storage.max_connections, 4);
        assert_eq!(config.feed.capacity, 64);
        assert_eq!(config.http.bind_address, "127.0.0.1:9090");
        assert!(!config.http.metrics_enabled);
    }

    #[test]
    fn config_missing_fields_use_defaults() {
        let toml = r#"
[storage]
database = "x.db"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.storage.max_connections, 10);
        assert_eq!(config.feed.capacity, 1024);
        assert_eq!(config.http.bind_address, "0.0.0.0:8080");
    }

    #[test]
    fn config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[feed]\ncapacity = 8").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.feed.capacity, 8);
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = Config::from_file(std::path::Path::new("/nonexistent/relay.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[feed]\ncapacity = \"many\"").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }
}
