//! outpost.toml configuration parser.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::{parse_duration, parse_period, require_duration, require_period};
use crate::error::{ConfigError, ConfigResult};
use crate::types::ComponentSpec;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutpostConfig {
    #[serde(default)]
    pub controller: ControllerSettings,
    #[serde(default, rename = "component")]
    pub components: Vec<ComponentSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSettings {
    #[serde(default = "default_sink_capacity")]
    pub sink_capacity: usize,
    #[serde(default = "default_send_timeout")]
    pub send_timeout: String,
    #[serde(default = "default_start_grace")]
    pub start_grace: String,
    #[serde(default = "default_resync_interval")]
    pub resync_interval: String,
}

fn default_sink_capacity() -> usize {
    1024
}

fn default_send_timeout() -> String {
    "1s".to_string()
}

fn default_start_grace() -> String {
    "200ms".to_string()
}

fn default_resync_interval() -> String {
    "30s".to_string()
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            sink_capacity: default_sink_capacity(),
            send_timeout: default_send_timeout(),
            start_grace: default_start_grace(),
            resync_interval: default_resync_interval(),
        }
    }
}

impl ControllerSettings {
    pub fn send_timeout(&self) -> Duration {
        parse_duration(&self.send_timeout).unwrap_or(Duration::from_secs(1))
    }

    pub fn start_grace(&self) -> Duration {
        parse_duration(&self.start_grace).unwrap_or(Duration::from_millis(200))
    }

    pub fn resync_interval(&self) -> Duration {
        parse_period(&self.resync_interval).unwrap_or(Duration::from_secs(30))
    }
}

impl OutpostConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: OutpostConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check controller timings, every component, and identity uniqueness.
    pub fn validate(&self) -> ConfigResult<()> {
        require_duration("controller.send_timeout", &self.controller.send_timeout)?;
        require_duration("controller.start_grace", &self.controller.start_grace)?;
        require_period("controller.resync_interval", &self.controller.resync_interval)?;

        let mut seen = HashSet::new();
        for spec in &self.components {
            spec.validate()?;
            if !seen.insert(spec.id()) {
                return Err(ConfigError::DuplicateComponent(spec.id().to_string()));
            }
        }
        Ok(())
    }
}
