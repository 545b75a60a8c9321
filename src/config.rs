use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::connect_handler::FetchOptions;
use crate::data_reader::DataReaderConfig;
use crate::simconnect::DEFAULT_PORT;

/// Server configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_update_rate_ms")]
    pub update_rate_ms: u64,
    #[serde(default = "default_reconnect_rate_secs")]
    pub reconnect_rate_secs: u64,
    #[serde(default = "default_replay_speed")]
    pub replay_speed: u32,
    /// AI aircraft further away from the user are not fetched, 0 disables the limit
    #[serde(default)]
    pub radius_km: u32,
    #[serde(default = "default_true")]
    pub fetch_ai_aircraft: bool,
    #[serde(default = "default_true")]
    pub fetch_ai_boats: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_replay: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_replay: Option<PathBuf>,
    /// Serve Prometheus metrics on this port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_port: Option<u16>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_update_rate_ms() -> u64 {
    500
}

fn default_reconnect_rate_secs() -> u64 {
    10
}

fn default_replay_speed() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

impl Default for NavConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            update_rate_ms: default_update_rate_ms(),
            reconnect_rate_secs: default_reconnect_rate_secs(),
            replay_speed: default_replay_speed(),
            radius_km: 0,
            fetch_ai_aircraft: true,
            fetch_ai_boats: true,
            load_replay: None,
            save_replay: None,
            metrics_port: None,
        }
    }
}

impl NavConfig {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let config: NavConfig =
            toml::from_str(&contents).with_context(|| format!("Failed to parse {:?}", path))?;
        Ok(config)
    }

    /// Like [`NavConfig::load`], but a missing file gives the defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Save config to a TOML file (atomic: write to .tmp then rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        let tmp_path = path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, &contents)
            .with_context(|| format!("Failed to write {:?}", tmp_path))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to rename {:?} to {:?}", tmp_path, path))?;
        Ok(())
    }

    pub fn fetch_options(&self) -> FetchOptions {
        let mut options = FetchOptions::empty();
        options.set(FetchOptions::FETCH_AI_AIRCRAFT, self.fetch_ai_aircraft);
        options.set(FetchOptions::FETCH_AI_BOAT, self.fetch_ai_boats);
        options
    }

    pub fn reader_config(&self) -> DataReaderConfig {
        DataReaderConfig {
            update_rate: Duration::from_millis(self.update_rate_ms.max(1)),
            reconnect_rate: Duration::from_secs(self.reconnect_rate_secs.max(1)),
            replay_speed: self.replay_speed.max(1),
            radius_km: self.radius_km,
            options: self.fetch_options(),
            load_replay: self.load_replay.clone(),
            save_replay: self.save_replay.clone(),
        }
    }
}

/// Resolve the config file path.
///
/// Priority:
/// 1. `ATOOLS_CONFIG` env var
/// 2. `./atools.toml`
pub fn nav_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("ATOOLS_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("./atools.toml")
}
