use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::controller::capture_session::{CaptureMode, CaptureSettings};
use crate::controller::normalizer::DEFAULT_DEADZONE;
use crate::discovery::{DiscoverySettings, DEFAULT_INTERVAL_MS, DISCOVERY_PORT};

const CONFIG_DIR: &str = "padlink";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub discovery: DiscoveryConfig,
    pub capture: CaptureConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub port: u16,
    pub interval_ms: u64,
    pub multi_interface: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: DISCOVERY_PORT,
            interval_ms: DEFAULT_INTERVAL_MS,
            multi_interface: true,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    pub mode: CaptureMode,
    pub deadzone: f32,
    pub haptic_pulse_ms: u64,
    /// Unset holds the stay-awake lock until capture stops.
    pub stay_awake_timeout_secs: Option<u64>,
    pub haptics_enabled: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            mode: CaptureMode::Overlay,
            deadzone: DEFAULT_DEADZONE,
            haptic_pulse_ms: 50,
            stay_awake_timeout_secs: None,
            haptics_enabled: true,
        }
    }
}

impl AppConfig {
    /// `<config dir>/padlink/config.toml`, falling back to the working
    /// directory when the platform has no config dir.
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| {
            warn!("Could not determine config directory, using current directory");
            PathBuf::from(".")
        });
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..1.0).contains(&self.capture.deadzone) {
            return Err(ConfigError::Invalid(format!(
                "deadzone must be in [0, 1), got {}",
                self.capture.deadzone
            )));
        }
        if self.discovery.interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "discovery interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let config = Self::from_toml(&content)?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await.map_err(io_err)?;
        debug!("Saved config to {}", path.display());
        Ok(())
    }

    /// Writes the default config if nothing exists at `path` yet.
    pub async fn ensure_default_config(path: &Path) -> Result<(), ConfigError> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        if !exists {
            info!("Creating default configuration at {}", path.display());
            Self::default().save(path).await?;
        }
        Ok(())
    }

    pub fn discovery_settings(&self) -> DiscoverySettings {
        DiscoverySettings {
            port: self.discovery.port,
            interval: Duration::from_millis(self.discovery.interval_ms),
            multi_interface: self.discovery.multi_interface,
        }
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            mode: self.capture.mode,
            deadzone: self.capture.deadzone,
            haptic_pulse: Duration::from_millis(self.capture.haptic_pulse_ms),
            stay_awake_timeout: self.capture.stay_awake_timeout_secs.map(Duration::from_secs),
        }
    }
}
