//! Daemon configuration.
//!
//! Written back with defaults on first run so users have a file to edit.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
    #[serde(default = "default_auto_schedule")]
    pub auto_schedule: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// How often the schedule is re-evaluated.  Minute granularity is
    /// enough: the only precision required is noticing the hour boundary.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// TOML stream catalog (highest priority; the daemon falls back to
    /// `./streams.toml`, then the built-in catalog).
    #[serde(default = "default_streams_toml")]
    pub streams_toml: PathBuf,
    /// Base url for resolving relative stream urls in the catalog.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
            auto_schedule: default_auto_schedule(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            streams_toml: default_streams_toml(),
            base_url: default_base_url(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            player: PlayerConfig::default(),
            schedule: ScheduleConfig::default(),
            catalog: CatalogConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

fn default_volume() -> f32 {
    0.5
}

fn default_auto_schedule() -> bool {
    true
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_streams_toml() -> PathBuf {
    platform::config_dir().join("streams.toml")
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000/".to_string()
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8991
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.player.default_volume, 0.5);
        assert!(config.player.auto_schedule);
        assert_eq!(config.schedule.poll_interval_secs, 60);
        assert!(config.http.enabled);
        assert_eq!(config.http.bind_address, "127.0.0.1");
        assert_eq!(config.http.port, 8991);
        assert!(config.catalog.base_url.ends_with('/'));
        assert!(config.catalog.streams_toml.ends_with("kirtan/streams.toml"));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            [http]
            port = 9000
            "#,
        )
        .unwrap();
        assert_eq!(config.http.port, 9000);
        assert!(config.http.enabled);
        assert_eq!(config.player.default_volume, 0.5);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = Config::default();
        let serialised = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&serialised).unwrap();
        assert_eq!(parsed.http.port, config.http.port);
        assert_eq!(parsed.schedule.poll_interval_secs, 60);
    }
}
