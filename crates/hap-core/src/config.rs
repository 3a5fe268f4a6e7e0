//! Accessory configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default TCP port for the accessory server.
pub const DEFAULT_PORT: u16 = 9123;

/// Static accessory configuration, loaded from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessoryConfig {
    /// Accessory identifier in `XX:XX:XX:XX:XX:XX` form. Also the pairing identifier.
    pub mac: String,
    /// Human readable model name (`md`).
    pub label: String,
    /// Setup code in `XXX-XX-XXX` form. Used as the SRP password.
    pub setup_code: String,
    /// Four character setup identifier used for the setup hash.
    pub setup_id: String,
    pub port: u16,
    /// Configuration number (`c#`). Starts at 1.
    #[serde(default = "default_configuration_index")]
    pub configuration_index: u32,
    /// State number (`s#`).
    #[serde(default = "default_state_index")]
    pub state_index: u32,
    /// Accessory category identifier (`ci`).
    #[serde(default = "default_category")]
    pub category: u16,
    /// Location of the persisted identity store.
    pub store_path: PathBuf,
}

fn default_configuration_index() -> u32 {
    1
}

fn default_state_index() -> u32 {
    1
}

fn default_category() -> u16 {
    1
}

impl AccessoryConfig {
    /// Start building a configuration with defaults.
    pub fn builder() -> AccessoryConfigBuilder {
        AccessoryConfigBuilder::new()
    }

    /// Load and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| Error::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Write this configuration as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Check field formats.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_mac(&self.mac) {
            return Err(Error::Config(format!("invalid accessory id: {}", self.mac)));
        }
        if !is_valid_setup_code(&self.setup_code) {
            return Err(Error::Config("setup code must look like XXX-XX-XXX".into()));
        }
        if self.setup_id.len() != 4 || !self.setup_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::Config("setup id must be 4 alphanumeric characters".into()));
        }
        if self.configuration_index == 0 {
            return Err(Error::Config("configuration index starts at 1".into()));
        }
        Ok(())
    }
}

fn is_valid_mac(mac: &str) -> bool {
    let parts: Vec<&str> = mac.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}

fn is_valid_setup_code(code: &str) -> bool {
    let groups: Vec<&str> = code.split('-').collect();
    groups.len() == 3
        && groups.iter().map(|g| g.len()).eq([3, 2, 3])
        && groups.iter().all(|g| g.chars().all(|c| c.is_ascii_digit()))
}

/// Builder for [`AccessoryConfig`].
pub struct AccessoryConfigBuilder {
    config: AccessoryConfig,
}

impl AccessoryConfigBuilder {
    /// Create new builder with defaults.
    pub fn new() -> Self {
        Self {
            config: AccessoryConfig {
                mac: "AA:BB:CC:DD:EE:FF".to_string(),
                label: "HAP Accessory".to_string(),
                setup_code: "031-45-154".to_string(),
                setup_id: "HSPN".to_string(),
                port: DEFAULT_PORT,
                configuration_index: default_configuration_index(),
                state_index: default_state_index(),
                category: default_category(),
                store_path: PathBuf::from("accessory.json"),
            },
        }
    }

    pub fn mac(mut self, mac: impl Into<String>) -> Self {
        self.config.mac = mac.into();
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.config.label = label.into();
        self
    }

    pub fn setup_code(mut self, code: impl Into<String>) -> Self {
        self.config.setup_code = code.into();
        self
    }

    pub fn setup_id(mut self, id: impl Into<String>) -> Self {
        self.config.setup_id = id.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn configuration_index(mut self, index: u32) -> Self {
        self.config.configuration_index = index;
        self
    }

    pub fn state_index(mut self, index: u32) -> Self {
        self.config.state_index = index;
        self
    }

    pub fn category(mut self, category: u16) -> Self {
        self.config.category = category;
        self
    }

    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.store_path = path.into();
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<AccessoryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for AccessoryConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
