//! # Config
//!
//! Framework configuration, stored as TOML. A missing file is created with the defaults.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::event::SubscriberErrorPolicy;

/// Errors loading or writing the configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading or writing the file failed
    #[error("config file: {0}")]
    Io(#[from] io::Error),
    /// The file is not valid TOML for [`FrameworkConfig`]
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    /// The defaults could not be serialized
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Default for `is_name_tracking_enabled`
fn default_name_tracking() -> bool {
    true
}

/// Default for `name_tracking_tag`: an invisible marker appended to the server name
fn default_name_tracking_tag() -> String {
    format!(
        "<color=#00000000><size=1>libexiled {}</size></color>",
        env!("CARGO_PKG_VERSION")
    )
}

/// Default for `log_level`
fn default_log_level() -> String {
    "info".to_string()
}

/// Framework configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkConfig {
    /// Whether the server name advertises the framework
    #[serde(default = "default_name_tracking")]
    pub is_name_tracking_enabled: bool,
    /// Text appended to the server name when name tracking is on
    #[serde(default = "default_name_tracking_tag")]
    pub name_tracking_tag: String,
    /// Apply event patches only once their event has a subscriber
    #[serde(default)]
    pub dynamic_patching: bool,
    /// What dispatch does when a subscriber fails
    #[serde(default)]
    pub subscriber_errors: SubscriberErrorPolicy,
    /// Ids of patches that are never applied
    #[serde(default)]
    pub disabled_patches: Vec<String>,
    /// Log level filter used when `RUST_LOG` is not set (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            is_name_tracking_enabled: default_name_tracking(),
            name_tracking_tag: default_name_tracking_tag(),
            dynamic_patching: false,
            subscriber_errors: SubscriberErrorPolicy::default(),
            disabled_patches: Vec::new(),
            log_level: default_log_level(),
        }
    }
}

impl FrameworkConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates it with the default configuration and returns the
    /// defaults.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            let content = fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            fs::write(path, toml::to_string_pretty(&config)?)?;
            info!("Created default configuration file: {}", path.display());
            Ok(config)
        }
    }

    /// Whether patch `id` is switched off
    pub fn is_disabled(&self, id: &str) -> bool {
        self.disabled_patches.iter().any(|d| d == id)
    }
}
