use crate::hotkey::Hotkey;
use crate::rule::{PortPair, PORT_PRESETS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Index into the port preset table.
    pub preset_index: usize,
    pub notifications_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hotkey: Option<String>,
    pub auto_recover: AutoRecoverConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoRecoverConfig {
    pub enabled: bool,
    pub delay_seconds: u64,
}

impl AutoRecoverConfig {
    pub const MIN_DELAY_SECONDS: u64 = 1;
    pub const MAX_DELAY_SECONDS: u64 = 999;

    pub fn new(enabled: bool, delay_seconds: u64) -> Self {
        Self {
            enabled,
            delay_seconds: delay_seconds.clamp(Self::MIN_DELAY_SECONDS, Self::MAX_DELAY_SECONDS),
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_seconds)
    }
}

impl Default for AutoRecoverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_seconds: 20,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            preset_index: 0,
            auto_recover: AutoRecoverConfig::default(),
            notifications_enabled: true,
            hotkey: None,
        }
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let default = Self::default();
            default.save()?;
            Ok(default)
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config.validated())
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Deletes the stored settings and writes the defaults back.
    pub fn reset() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            std::fs::remove_file(&config_path)?;
        }
        let default = Self::default();
        default.save()?;
        info!(path = %config_path.display(), "settings reset");
        Ok(default)
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pairblock")
            .join("config.toml")
    }

    /// Brings hand-edited values back into range.
    pub fn validated(mut self) -> Self {
        if self.preset_index >= PORT_PRESETS.len() {
            warn!(index = self.preset_index, "port preset out of range, using the first one");
            self.preset_index = 0;
        }
        self.auto_recover =
            AutoRecoverConfig::new(self.auto_recover.enabled, self.auto_recover.delay_seconds);

        if let Some(raw) = self.hotkey.take().filter(|h| !h.trim().is_empty()) {
            match raw.parse::<Hotkey>() {
                Ok(hotkey) => self.hotkey = Some(hotkey.to_string()),
                Err(e) => warn!(error = %e, "ignoring invalid hotkey"),
            }
        }
        self
    }

    pub fn ports(&self) -> PortPair {
        PortPair::preset(self.preset_index).unwrap_or(PORT_PRESETS[0])
    }

    pub fn hotkey(&self) -> Option<Hotkey> {
        self.hotkey.as_deref().and_then(|h| h.parse().ok())
    }
}
