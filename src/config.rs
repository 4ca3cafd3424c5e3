// src/config.rs
//! Configuration management backed by a JSON file in the user's config directory

use crate::{
    error::{Result, WalkError},
    gps::{StreamKind, SubscriptionOptions},
};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub source_type: String, // "gpsd", "serial", "replay"
    pub serial_port: Option<String>,
    pub serial_baudrate: Option<u32>,
    pub gpsd_host: Option<String>,
    pub gpsd_port: Option<u16>,
    pub replay_file: Option<PathBuf>,
    pub replay_interval_ms: Option<u64>,
    /// Where walks are stored; defaults to `~/.local/share/walk-tracker`.
    pub data_dir: Option<PathBuf>,
    pub fix_timeout_ms: u64,
    pub min_distance_m: f64,
    pub min_interval_ms: u64,
    pub fastest_interval_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            source_type: "gpsd".to_string(),
            serial_port: None,
            serial_baudrate: Some(9600),
            gpsd_host: Some("localhost".to_string()),
            gpsd_port: Some(2947),
            replay_file: None,
            replay_interval_ms: Some(1000),
            data_dir: None,
            fix_timeout_ms: 5000,
            min_distance_m: 5.0,
            min_interval_ms: 5000,
            fastest_interval_ms: 2000,
        }
    }
}

impl TrackerConfig {
    /// Load from a config file; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| WalkError::Other(format!("Failed to read config file: {}", e)))?;

        serde_json::from_str(&contents)
            .map_err(|e| WalkError::Other(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                WalkError::Other(format!("Failed to create config directory: {}", e))
            })?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .map_err(|e| WalkError::Other(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    pub fn get_config_path() -> Result<PathBuf> {
        Ok(home_dir()?
            .join(".config")
            .join("walk-tracker")
            .join("config.json"))
    }

    /// Directory holding the active walk and the archive
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(home_dir()?
                .join(".local")
                .join("share")
                .join("walk-tracker")),
        }
    }

    /// Update serial port settings; without a baud rate the configured one is kept
    pub fn update_serial(&mut self, port: String, baudrate: Option<u32>) {
        self.source_type = "serial".to_string();
        self.serial_port = Some(port);
        self.serial_baudrate = Some(baudrate.or(self.serial_baudrate).unwrap_or(9600));
    }

    /// Update gpsd settings
    pub fn update_gpsd(&mut self, host: String, port: u16) {
        self.source_type = "gpsd".to_string();
        self.gpsd_host = Some(host);
        self.gpsd_port = Some(port);
    }

    /// Update replay settings
    pub fn update_replay(&mut self, file: PathBuf, interval_ms: u64) {
        self.source_type = "replay".to_string();
        self.replay_file = Some(file);
        self.replay_interval_ms = Some(interval_ms);
    }

    /// The receiver stream described by the current settings
    pub fn stream_kind(&self) -> Result<StreamKind> {
        match self.source_type.as_str() {
            "gpsd" => Ok(StreamKind::Gpsd {
                host: self
                    .gpsd_host
                    .clone()
                    .unwrap_or_else(|| "localhost".to_string()),
                port: self.gpsd_port.unwrap_or(2947),
            }),
            "serial" => {
                let port = self.serial_port.clone().ok_or_else(|| {
                    WalkError::Other("No serial port configured".to_string())
                })?;
                Ok(StreamKind::Serial {
                    port,
                    baudrate: self.serial_baudrate.unwrap_or(9600),
                })
            }
            "replay" => {
                let path = self.replay_file.clone().ok_or_else(|| {
                    WalkError::Other("No replay file configured".to_string())
                })?;
                Ok(StreamKind::Replay {
                    path,
                    interval: Duration::from_millis(self.replay_interval_ms.unwrap_or(1000)),
                })
            }
            other => Err(WalkError::Other(format!("Unknown source type: {}", other))),
        }
    }

    pub fn subscription_options(&self) -> SubscriptionOptions {
        SubscriptionOptions {
            min_distance_m: self.min_distance_m,
            min_interval: Duration::from_millis(self.min_interval_ms),
            fastest_interval: Duration::from_millis(self.fastest_interval_ms),
        }
    }

    pub fn fix_timeout(&self) -> Duration {
        Duration::from_millis(self.fix_timeout_ms)
    }
}

fn home_dir() -> Result<PathBuf> {
    std::env::var("HOME")
        .map(PathBuf::from)
        .map_err(|_| WalkError::Other("HOME environment variable not set".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = TrackerConfig::default();
        assert_eq!(config.source_type, "gpsd");
        assert_eq!(config.subscription_options(), SubscriptionOptions::default());
        assert_eq!(config.fix_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_update_serial() {
        let mut config = TrackerConfig::default();
        config.update_serial("/dev/ttyUSB0".to_string(), Some(115200));
        assert_eq!(config.source_type, "serial");
        assert_eq!(config.serial_port, Some("/dev/ttyUSB0".to_string()));

        match config.stream_kind().unwrap() {
            StreamKind::Serial { port, baudrate } => {
                assert_eq!(port, "/dev/ttyUSB0");
                assert_eq!(baudrate, 115200);
            }
            other => panic!("unexpected stream: {}", other),
        }
    }

    #[test]
    fn test_update_serial_keeps_configured_baudrate() {
        let mut config = TrackerConfig {
            serial_baudrate: Some(4800),
            ..TrackerConfig::default()
        };
        config.update_serial("/dev/ttyACM0".to_string(), None);
        assert_eq!(config.serial_baudrate, Some(4800));

        config.serial_baudrate = None;
        config.update_serial("/dev/ttyACM0".to_string(), None);
        assert_eq!(config.serial_baudrate, Some(9600));

        config.update_serial("/dev/ttyACM0".to_string(), Some(38400));
        assert_eq!(config.serial_baudrate, Some(38400));
    }

    #[test]
    fn test_incomplete_sources_are_rejected() {
        let mut config = TrackerConfig {
            source_type: "serial".to_string(),
            ..TrackerConfig::default()
        };
        assert!(config.stream_kind().is_err());

        config.source_type = "replay".to_string();
        assert!(config.stream_kind().is_err());

        config.source_type = "bluetooth".to_string();
        assert!(config.stream_kind().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        assert_eq!(
            TrackerConfig::load_from(&path).unwrap(),
            TrackerConfig::default()
        );

        let mut config = TrackerConfig::default();
        config.update_replay(PathBuf::from("/tmp/walk.nmea"), 250);
        config.min_distance_m = 10.0;
        config.save_to(&path).unwrap();

        assert_eq!(TrackerConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"gpsd_port": 3000}"#).unwrap();

        let config = TrackerConfig::load_from(&path).unwrap();
        assert_eq!(config.gpsd_port, Some(3000));
        assert_eq!(config.source_type, "gpsd");
        assert_eq!(config.min_interval_ms, 5000);
    }
}
