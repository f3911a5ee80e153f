//! Configuration file support for Basal.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/basal/config.toml`.

use crate::overlay::OverlayOptions;
use crate::reservoir::ContinuityWindow;
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub reservoir: ReservoirConfig,

    #[serde(default)]
    pub overlay: OverlayConfig,

    #[serde(default)]
    pub temp_basal: TempBasalConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Reservoir continuity limits
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReservoirConfig {
    #[serde(default = "default_max_gap_minutes")]
    pub max_gap_minutes: i64,
}

impl Default for ReservoirConfig {
    fn default() -> Self {
        Self {
            max_gap_minutes: default_max_gap_minutes(),
        }
    }
}

/// Basal overlay tuning
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OverlayConfig {
    #[serde(default)]
    pub gap_patch_seconds: i64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            gap_patch_seconds: 0,
        }
    }
}

/// Temp basal command filtering
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TempBasalConfig {
    #[serde(default = "default_continuation_minutes")]
    pub continuation_minutes: i64,
}

impl Default for TempBasalConfig {
    fn default() -> Self {
        Self {
            continuation_minutes: default_continuation_minutes(),
        }
    }
}

/// Longest duration any setting may configure (one week)
pub const MAX_SETTING_MINUTES: i64 = 7 * 24 * 60;

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        std::env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".local/share"))
            .unwrap_or_else(|| PathBuf::from("."))
    });
    base.join("basal")
}

fn default_max_gap_minutes() -> i64 {
    30
}

fn default_continuation_minutes() -> i64 {
    11
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Reject settings no pump history could satisfy
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_SETTING_MINUTES).contains(&self.reservoir.max_gap_minutes) {
            return Err(Error::Config(format!(
                "reservoir.max_gap_minutes must be between 1 and {}, got {}",
                MAX_SETTING_MINUTES, self.reservoir.max_gap_minutes
            )));
        }
        if !(0..=MAX_SETTING_MINUTES * 60).contains(&self.overlay.gap_patch_seconds) {
            return Err(Error::Config(format!(
                "overlay.gap_patch_seconds must be between 0 and {}, got {}",
                MAX_SETTING_MINUTES * 60,
                self.overlay.gap_patch_seconds
            )));
        }
        if !(0..=MAX_SETTING_MINUTES).contains(&self.temp_basal.continuation_minutes) {
            return Err(Error::Config(format!(
                "temp_basal.continuation_minutes must be between 0 and {}, got {}",
                MAX_SETTING_MINUTES, self.temp_basal.continuation_minutes
            )));
        }
        Ok(())
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(|home| PathBuf::from(home).join(".config"))
                .unwrap_or_else(|| PathBuf::from("."))
        });
        base.join("basal").join("config.toml")
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    pub fn max_reservoir_gap(&self) -> Duration {
        Duration::minutes(self.reservoir.max_gap_minutes)
    }

    pub fn continuation_interval(&self) -> Duration {
        Duration::minutes(self.temp_basal.continuation_minutes)
    }

    /// Continuity window using the configured gap limit
    pub fn continuity_window(&self, start: Option<DateTime<Utc>>, end: DateTime<Utc>) -> ContinuityWindow {
        ContinuityWindow::new(start, end).with_max_gap(self.max_reservoir_gap())
    }

    /// Overlay options using the configured gap patch interval
    pub fn overlay_options(&self) -> OverlayOptions {
        OverlayOptions {
            gap_patch_interval: Duration::seconds(self.overlay.gap_patch_seconds),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.reservoir.max_gap_minutes, 30);
        assert_eq!(config.overlay.gap_patch_seconds, 0);
        assert_eq!(config.temp_basal.continuation_minutes, 11);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.overlay.gap_patch_seconds = 90;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.overlay.gap_patch_seconds, 90);
        assert_eq!(loaded.reservoir.max_gap_minutes, 30);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[temp_basal]
continuation_minutes = 20
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.temp_basal.continuation_minutes, 20);
        assert_eq!(config.reservoir.max_gap_minutes, 30); // default
        assert_eq!(config.continuation_interval(), Duration::minutes(20));
    }

    #[test]
    fn test_invalid_gap_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[reservoir]\nmax_gap_minutes = 0\n").unwrap();

        let result = Config::load_from(&path);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_out_of_range_durations_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");

        for contents in [
            "[temp_basal]\ncontinuation_minutes = 9223372036854775807\n",
            "[reservoir]\nmax_gap_minutes = 100000000\n",
            "[overlay]\ngap_patch_seconds = -1\n",
        ] {
            std::fs::write(&path, contents).unwrap();
            let result = Config::load_from(&path);
            assert!(matches!(result, Err(Error::Config(_))), "accepted {:?}", contents);
        }

        std::fs::write(&path, "[temp_basal]\ncontinuation_minutes = 10080\n").unwrap();
        assert!(Config::load_from(&path).is_ok());
    }

    #[test]
    fn test_overlay_options_from_config() {
        let mut config = Config::default();
        config.overlay.gap_patch_seconds = 120;

        let options = config.overlay_options();
        assert_eq!(options.gap_patch_interval, Duration::minutes(2));
        assert_eq!(options.end_date, None);
    }
}
