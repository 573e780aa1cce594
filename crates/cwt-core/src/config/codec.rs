//! Envelope codec configuration.

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Settings applied to every encode and decode call.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CodecConfig {
    /// Hex-encoded external additional authenticated data.
    ///
    /// Both sides must agree on it; it is mixed into the signature, MAC and
    /// encryption structures but never transmitted.
    #[serde(default)]
    pub external_aad_hex: Option<String>,

    /// Reject tokens that lack the outer CWT tag.
    #[serde(default)]
    pub require_token_tag: bool,
}

impl CodecConfig {
    /// Decode the external AAD, empty when none is configured.
    pub fn external_aad(&self) -> Result<Vec<u8>, ConfigError> {
        match &self.external_aad_hex {
            Some(hex_aad) => hex::decode(hex_aad.trim())
                .map_err(|e| ConfigError::Config(format!("invalid external_aad_hex: {e}"))),
            None => Ok(Vec::new()),
        }
    }
}
