//! Key set configuration.
//!
//! Keys are described the way JWK-style test vectors describe them: a key
//! type, an algorithm name, an optional text key id and hex-encoded key
//! parameters (`k_hex` for symmetric keys, `d_hex`/`x_hex` for Ed25519).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::ConfigError;

/// A single key description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyConfig {
    /// Key type: `oct` for symmetric keys, `OKP` for Ed25519 keys.
    pub kty: String,

    /// Algorithm name (e.g., "HS256/64", "A128GCM", "EdDSA").
    pub alg: String,

    /// Key identifier, stored as its UTF-8 bytes.
    #[serde(default)]
    pub kid: Option<String>,

    /// Symmetric key bytes (hex).
    #[serde(default)]
    pub k_hex: Option<String>,

    /// Ed25519 private seed (hex).
    #[serde(default)]
    pub d_hex: Option<String>,

    /// Ed25519 public key (hex).
    #[serde(default)]
    pub x_hex: Option<String>,
}

impl KeyConfig {
    /// Decoded symmetric key bytes.
    pub fn k(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        decode_param("k_hex", self.k_hex.as_deref())
    }

    /// Decoded private key bytes.
    pub fn d(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        decode_param("d_hex", self.d_hex.as_deref())
    }

    /// Decoded public key bytes.
    pub fn x(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        decode_param("x_hex", self.x_hex.as_deref())
    }

    /// Key identifier bytes, if any.
    pub fn kid_bytes(&self) -> Option<Vec<u8>> {
        self.kid.as_ref().map(|kid| kid.as_bytes().to_vec())
    }
}

fn decode_param(name: &str, value: Option<&str>) -> Result<Option<Vec<u8>>, ConfigError> {
    value
        .map(|text| {
            hex::decode(text.trim())
                .map_err(|e| ConfigError::Config(format!("invalid {name}: {e}")))
        })
        .transpose()
}

/// Configuration for one key set.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KeySetConfig {
    /// Inline key definitions.
    #[serde(default)]
    pub keys: Vec<KeyConfig>,

    /// Path to a file with additional keys (YAML, or JSON with a `.json` extension).
    #[serde(default)]
    pub keys_file: Option<PathBuf>,

    /// Environment variable containing additional keys as YAML.
    #[serde(default)]
    pub keys_env: Option<String>,
}

impl KeySetConfig {
    /// Collect every configured key: inline first, then environment, then file.
    pub fn resolve(&self) -> Result<Vec<KeyConfig>, ConfigError> {
        let mut keys = self.keys.clone();

        if let Some(env_var) = &self.keys_env {
            if let Ok(content) = std::env::var(env_var) {
                let env_keys: Vec<KeyConfig> = serde_yaml::from_str(&content)?;
                keys.extend(env_keys);
            }
        }

        if let Some(path) = &self.keys_file {
            if path.exists() {
                keys.extend(Self::load_key_file(path)?);
            } else {
                tracing::warn!(path = %path.display(), "Key file not found, skipping");
            }
        }

        Ok(keys)
    }

    /// Load a list of keys from a file.
    pub fn load_key_file(path: impl AsRef<Path>) -> Result<Vec<KeyConfig>, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(serde_yaml::from_str(&content)?)
        }
    }

    /// Resolve a relative `keys_file` against `base_dir`.
    pub(crate) fn anchor(&mut self, base_dir: &Path) {
        if let Some(file) = &self.keys_file {
            if !file.is_absolute() {
                self.keys_file = Some(base_dir.join(file));
            }
        }
    }
}
