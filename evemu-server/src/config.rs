use std::path::{Path, PathBuf};

use evemu_core::{DecodeLimits, DumpLevel};
use serde::{Deserialize, Serialize};

/// Environment variable naming the JSON config file.
pub const CONFIG_ENV: &str = "EVEMU_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Server configuration. Every field has a default, so a config file only
/// needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub log_dir: PathBuf,
    pub log_prefix: String,
    /// Level at which agent calls and responses are dumped.
    pub dump_level: DumpLevel,
    pub max_decode_depth: usize,
    /// Number of simulated sessions the demo binary runs.
    pub demo_clients: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            log_prefix: "evemu-server".to_string(),
            dump_level: DumpLevel::Debug,
            max_decode_depth: DecodeLimits::default().max_depth,
            demo_clients: 4,
        }
    }
}

impl ServerConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Load from the file named by `EVEMU_CONFIG`, or fall back to defaults
    /// when the variable is unset.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn decode_limits(&self) -> DecodeLimits {
        DecodeLimits {
            max_depth: self.max_decode_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.log_prefix, "evemu-server");
        assert_eq!(config.decode_limits(), DecodeLimits::default());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ServerConfig::from_json(r#"{"dump_level": "trace", "max_decode_depth": 8}"#)
            .unwrap();
        assert_eq!(config.dump_level, DumpLevel::Trace);
        assert_eq!(config.decode_limits().max_depth, 8);
        assert_eq!(config.log_dir, PathBuf::from("logs"));
    }

    #[test]
    fn test_invalid_json() {
        let err = ServerConfig::from_json(r#"{"dump_level": "loud"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = ServerConfig::from_file("/nonexistent/evemu.json").unwrap_err();
        match err {
            ConfigError::Io { path, .. } => {
                assert_eq!(path, PathBuf::from("/nonexistent/evemu.json"))
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
