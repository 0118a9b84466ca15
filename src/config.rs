//! Runtime configuration shared by the host client and the native server.

use std::path::Path;
use std::time::Duration;

use plugbridge_abi::Limits;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Bridge settings. Every field has a default, so a config file only names
/// what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Host-side timeout per call. `None` waits forever.
    pub call_timeout_ms: Option<u64>,
    /// Largest channel frame accepted or sent, in bytes.
    pub max_frame_size: usize,
    /// Bounds for decoding arguments and results.
    pub limits: Limits,
    /// Capacity of the server's outbound response queue.
    pub channel_buffer: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: Some(30_000),
            max_frame_size: 16 * 1024 * 1024,
            limits: Limits::default(),
            channel_buffer: 64,
        }
    }
}

impl BridgeConfig {
    pub fn from_json(src: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(src)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&src)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout_ms = timeout.map(|t| t.as_millis().min(u64::MAX as u128) as u64);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_files_keep_defaults() {
        let config = BridgeConfig::from_json(r#"{ "call_timeout_ms": 250 }"#).unwrap();
        assert_eq!(config.call_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.max_frame_size, BridgeConfig::default().max_frame_size);
        assert_eq!(config.limits, Limits::default());
    }

    #[test]
    fn null_timeout_waits_forever() {
        let config = BridgeConfig::from_json(r#"{ "call_timeout_ms": null }"#).unwrap();
        assert_eq!(config.call_timeout(), None);
    }

    #[test]
    fn unreadable_file_names_the_path() {
        let err = BridgeConfig::from_file("/nonexistent/bridge.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/bridge.json"));
    }
}
