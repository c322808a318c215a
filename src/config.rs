//! Bridge configuration stored as TOML
//!
//! Looked up in this order: first CLI argument, `DRIVEBRIDGE_CONFIG`, then
//! `<config dir>/drivebridge/config.toml`. A missing file yields the defaults
//! and is written out so it can be edited; a malformed one stops startup.

use crate::router::RouterSettings;
use crate::steering::PwmSettings;
use color_eyre::eyre::{eyre, Result, WrapErr};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const CONFIG_ENV: &str = "DRIVEBRIDGE_CONFIG";

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    pub server: ServerConfig,
    pub steering: SteeringConfig,
    pub gamepad: GamepadConfig,
    pub focus: FocusConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8765,
        }
    }
}

/// PWM loop timing
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SteeringConfig {
    pub cycle_ms: u64,
    pub center_threshold: f32,
    pub full_lock_threshold: f32,
    pub min_off_ms: u64,
}

impl Default for SteeringConfig {
    fn default() -> Self {
        let pwm = PwmSettings::default();
        Self {
            cycle_ms: pwm.cycle.as_millis() as u64,
            center_threshold: pwm.center_threshold,
            full_lock_threshold: pwm.full_lock_threshold,
            min_off_ms: pwm.min_off.as_millis() as u64,
        }
    }
}

impl SteeringConfig {
    pub fn pwm_settings(&self) -> PwmSettings {
        PwmSettings {
            cycle: Duration::from_millis(self.cycle_ms),
            center_threshold: self.center_threshold,
            full_lock_threshold: self.full_lock_threshold,
            min_off: Duration::from_millis(self.min_off_ms),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct GamepadConfig {
    /// Minimum axis change before a new value is sent
    pub debounce: i32,
    /// Pause after creating the gamepad before the first event
    pub settle_ms: u64,
}

impl Default for GamepadConfig {
    fn default() -> Self {
        Self {
            debounce: RouterSettings::default().axis_debounce,
            settle_ms: 500,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct FocusConfig {
    /// X11 window id as printed by `wmctrl -l`
    pub window_id: Option<String>,
    /// Case-insensitive title substring, used when no id is set
    pub window_title: Option<String>,
    pub min_interval_ms: u64,
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            window_id: None,
            window_title: None,
            min_interval_ms: 250,
        }
    }
}

impl BridgeConfig {
    pub fn router_settings(&self) -> RouterSettings {
        RouterSettings {
            pwm: self.steering.pwm_settings(),
            axis_debounce: self.gamepad.debounce,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let steering = &self.steering;
        if self.server.port == 0 {
            return Err(eyre!("server.port must not be 0"));
        }
        if steering.cycle_ms == 0 {
            return Err(eyre!("steering.cycle_ms must be positive"));
        }
        if steering.min_off_ms >= steering.cycle_ms {
            return Err(eyre!(
                "steering.min_off_ms ({}) must be shorter than steering.cycle_ms ({})",
                steering.min_off_ms,
                steering.cycle_ms
            ));
        }
        if !(steering.center_threshold > 0.0
            && steering.center_threshold < steering.full_lock_threshold
            && steering.full_lock_threshold <= 1.0)
        {
            return Err(eyre!(
                "steering thresholds must satisfy 0 < center ({}) < full lock ({}) <= 1",
                steering.center_threshold,
                steering.full_lock_threshold
            ));
        }
        if self.gamepad.debounce < 0 {
            return Err(eyre!("gamepad.debounce must not be negative"));
        }
        Ok(())
    }

    /// Reads and validates a config file, creating it with defaults if missing
    pub async fn load_or_create(path: &Path) -> Result<Self> {
        let exists = tokio::fs::try_exists(path)
            .await
            .wrap_err_with(|| format!("Failed to check config file {}", path.display()))?;

        let config = if exists {
            let content = tokio::fs::read_to_string(path)
                .await
                .wrap_err_with(|| format!("Failed to read config file {}", path.display()))?;
            let config: BridgeConfig = toml::from_str(&content)
                .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;
            info!("Loaded configuration from {}", path.display());
            config
        } else {
            let config = BridgeConfig::default();
            if let Err(e) = config.save(path).await {
                warn!("Could not write default config: {}", e);
            }
            config
        };

        config.validate()?;
        debug!("Effective configuration: {:?}", config);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .wrap_err_with(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| eyre!("Failed to serialize config: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .wrap_err_with(|| format!("Failed to write config file {}", path.display()))?;
        info!("Wrote default configuration to {}", path.display());
        Ok(())
    }
}

/// Resolves the config location from CLI argument, environment or platform default
pub fn config_path(cli_arg: Option<String>) -> PathBuf {
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .unwrap_or_else(|| {
            warn!("No config directory found, using current directory");
            PathBuf::from(".")
        })
        .join("drivebridge")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("drivebridge-test-{}-{}", std::process::id(), name))
            .join("config.toml")
    }

    #[test]
    fn defaults_match_engine_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.steering.pwm_settings(), PwmSettings::default());
        assert_eq!(config.router_settings(), RouterSettings::default());
        assert_eq!(config.server.port, 8765);
        config.validate().unwrap();
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config: BridgeConfig = toml::from_str(
            r#"
            [steering]
            cycle_ms = 40

            [focus]
            window_title = "Speed Dreams"
            "#,
        )
        .unwrap();

        assert_eq!(config.steering.cycle_ms, 40);
        assert_eq!(config.steering.min_off_ms, 8);
        assert_eq!(config.focus.window_title.as_deref(), Some("Speed Dreams"));
        assert_eq!(config.focus.min_interval_ms, 250);
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn rejects_inconsistent_timing() {
        let mut config = BridgeConfig::default();
        config.steering.min_off_ms = 60;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.steering.center_threshold = 0.99;
        assert!(config.validate().is_err());

        let mut config = BridgeConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn missing_file_is_created_with_defaults() {
        let path = scratch_path("create");
        let _ = tokio::fs::remove_file(&path).await;

        let config = BridgeConfig::load_or_create(&path).await.unwrap();
        assert_eq!(config, BridgeConfig::default());

        let reloaded = BridgeConfig::load_or_create(&path).await.unwrap();
        assert_eq!(reloaded, config);

        let _ = tokio::fs::remove_dir_all(path.parent().unwrap()).await;
    }

    #[tokio::test]
    async fn malformed_file_fails() {
        let path = scratch_path("malformed");
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, "[server\nport = ").await.unwrap();

        assert!(BridgeConfig::load_or_create(&path).await.is_err());

        let _ = tokio::fs::remove_dir_all(path.parent().unwrap()).await;
    }

    #[test]
    fn cli_argument_wins() {
        assert_eq!(
            config_path(Some("/tmp/bridge.toml".to_string())),
            PathBuf::from("/tmp/bridge.toml")
        );
    }
}
