//! Configuration types for CBOR Web Token handling.
//!
//! Configuration is loaded from a YAML file (typically `cwt.yaml`) holding two
//! key sets and the codec settings:
//!
//! - **keys**: symmetric keys used to decrypt and verify MACs, and to protect
//!   newly issued tokens
//! - **signing_keys**: keys used for signatures (public keys are enough to verify)
//! - **codec**: external AAD and outer tag policy

pub mod codec;
pub mod keys;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub use codec::CodecConfig;
pub use keys::{KeyConfig, KeySetConfig};

/// Complete CWT configuration loaded from files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CwtConfig {
    /// Keys for encryption and MAC layers.
    #[serde(default)]
    pub keys: KeySetConfig,

    /// Keys for signature layers.
    #[serde(default)]
    pub signing_keys: KeySetConfig,

    /// Envelope codec settings.
    #[serde(default)]
    pub codec: CodecConfig,
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CwtConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }

    /// Load configuration and anchor relative key file paths.
    ///
    /// Relative `keys_file` entries are resolved against the directory that
    /// contains the configuration file, so the result can be used from any
    /// working directory.
    pub fn load_with_context(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = Self::from_file(path)?;

        let base_dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        config.keys.anchor(&base_dir);
        config.signing_keys.anchor(&base_dir);

        Ok(config)
    }
}
