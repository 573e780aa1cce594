//! Token creation and decoding.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use cwt_core::CwtConfig;
use serde_cbor::Value;

use crate::claims::{ClaimKey, ClaimsMap};
use crate::codec::{self, CodecOptions, ProtectionKeys};
use crate::crypto::CryptoBackends;
use crate::error::{CwtError, CwtResult};
use crate::keys::{KeyMaterial, KeySet};
use crate::resolver::KeyResolver;
use crate::schema::ClaimId;

/// A CBOR Web Token: a claims map plus the keys that protect it.
#[derive(Debug, Clone, Default)]
pub struct Token {
    claims: ClaimsMap,
    signing_key: Option<KeyMaterial>,
    mac_key: Option<KeyMaterial>,
    encryption_key: Option<KeyMaterial>,
}

impl Token {
    /// Create an empty token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a token around existing claims.
    pub fn from_claims(claims: ClaimsMap) -> Self {
        Self {
            claims,
            ..Self::default()
        }
    }

    /// Create a token from an unprotected CBOR claims map.
    pub fn from_claims_value(value: Value) -> CwtResult<Self> {
        Ok(Self::from_claims(ClaimsMap::from_value(value)?))
    }

    /// Create a token from the CBOR encoding of an unprotected claims map.
    pub fn from_claims_bytes(bytes: &[u8]) -> CwtResult<Self> {
        Ok(Self::from_claims(ClaimsMap::from_bytes(bytes)?))
    }

    /// The token's claims.
    pub fn claims(&self) -> &ClaimsMap {
        &self.claims
    }

    /// Mutable access to the token's claims.
    pub fn claims_mut(&mut self) -> &mut ClaimsMap {
        &mut self.claims
    }

    /// Check whether a claim is present, resolving aliases.
    pub fn has_claim(&self, key: impl Into<ClaimKey>) -> bool {
        self.claims.has(key)
    }

    /// Read a claim, resolving aliases.
    pub fn claim(&self, key: impl Into<ClaimKey>) -> CwtResult<&Value> {
        self.claims.get(key)
    }

    /// Set a claim, validating it against the claim schema.
    pub fn set_claim(&mut self, key: impl Into<ClaimKey>, value: Value) -> CwtResult<()> {
        self.claims.set(key, value)
    }

    /// Set a time claim to a tagged epoch timestamp.
    pub fn set_time(&mut self, claim: ClaimId, at: DateTime<Utc>) -> CwtResult<()> {
        self.claims.set_time(claim, at)
    }

    /// Identifiers of every claim in the token.
    pub fn claim_keys(&self) -> Vec<ClaimKey> {
        self.claims.keys().cloned().collect()
    }

    /// Key used for the signature layer.
    pub fn signing_key(&self) -> Option<&KeyMaterial> {
        self.signing_key.as_ref()
    }

    /// Key used for the MAC layer.
    pub fn mac_key(&self) -> Option<&KeyMaterial> {
        self.mac_key.as_ref()
    }

    /// Key used for the encryption layer.
    pub fn encryption_key(&self) -> Option<&KeyMaterial> {
        self.encryption_key.as_ref()
    }

    /// Replace or clear the signing key.
    pub fn set_signing_key(&mut self, key: Option<KeyMaterial>) {
        self.signing_key = key;
    }

    /// Replace or clear the MAC key. A MAC key must carry a key id.
    pub fn set_mac_key(&mut self, key: Option<KeyMaterial>) {
        self.mac_key = key;
    }

    /// Replace or clear the encryption key.
    pub fn set_encryption_key(&mut self, key: Option<KeyMaterial>) {
        self.encryption_key = key;
    }

    /// Sign the token with `key` when encoding.
    pub fn with_signing_key(mut self, key: KeyMaterial) -> Self {
        self.signing_key = Some(key);
        self
    }

    /// MAC the token with `key` when encoding.
    pub fn with_mac_key(mut self, key: KeyMaterial) -> Self {
        self.mac_key = Some(key);
        self
    }

    /// Encrypt the token with `key` when encoding.
    pub fn with_encryption_key(mut self, key: KeyMaterial) -> Self {
        self.encryption_key = Some(key);
        self
    }

    /// Encode the token with the built-in crypto backends.
    pub fn encode(&self) -> CwtResult<Vec<u8>> {
        self.encode_with(&CryptoBackends::default(), &CodecOptions::default())
    }

    /// Encode the token with custom backends and options.
    pub fn encode_with(
        &self,
        backends: &CryptoBackends<'_>,
        options: &CodecOptions,
    ) -> CwtResult<Vec<u8>> {
        let keys = ProtectionKeys {
            signing: self.signing_key.as_ref(),
            mac: self.mac_key.as_ref(),
            encryption: self.encryption_key.as_ref(),
        };
        codec::encode(&self.claims, keys, backends, options)
    }

    /// Encode the token as unpadded base64url text.
    pub fn to_base64(&self) -> CwtResult<String> {
        Ok(URL_SAFE_NO_PAD.encode(self.encode()?))
    }

    /// Decode a token using key sets for MAC/decryption and for signatures.
    pub fn decode(bytes: &[u8], keys: &KeySet, sign_keys: &KeySet) -> CwtResult<Self> {
        Self::decode_with(
            bytes,
            keys,
            sign_keys,
            &CryptoBackends::default(),
            &CodecOptions::default(),
        )
    }

    /// Decode a token with custom resolvers, backends and options.
    pub fn decode_with(
        bytes: &[u8],
        keys: &dyn KeyResolver,
        sign_keys: &dyn KeyResolver,
        backends: &CryptoBackends<'_>,
        options: &CodecOptions,
    ) -> CwtResult<Self> {
        let unwrapped = codec::decode(bytes, keys, sign_keys, backends, options)?;
        Ok(Self {
            claims: unwrapped.claims,
            signing_key: unwrapped.signing_key,
            mac_key: unwrapped.mac_key,
            encryption_key: unwrapped.encryption_key,
        })
    }
}

/// Decoder bound to configured key sets and codec options.
pub struct TokenDecoder {
    keys: KeySet,
    sign_keys: KeySet,
    options: CodecOptions,
}

impl TokenDecoder {
    /// Create a decoder with default codec options.
    pub fn new(keys: KeySet, sign_keys: KeySet) -> Self {
        Self {
            keys,
            sign_keys,
            options: CodecOptions::default(),
        }
    }

    /// Create a decoder from loaded configuration.
    pub fn from_config(config: &CwtConfig) -> CwtResult<Self> {
        Ok(Self {
            keys: KeySet::from_config(&config.keys)?,
            sign_keys: KeySet::from_config(&config.signing_keys)?,
            options: CodecOptions::from_config(&config.codec)?,
        })
    }

    /// Replace the codec options.
    pub fn with_options(mut self, options: CodecOptions) -> Self {
        self.options = options;
        self
    }

    /// The codec options used for decoding.
    pub fn options(&self) -> &CodecOptions {
        &self.options
    }

    /// Decode and verify a token.
    pub fn decode(&self, bytes: &[u8]) -> CwtResult<Token> {
        Token::decode_with(
            bytes,
            &self.keys,
            &self.sign_keys,
            &CryptoBackends::default(),
            &self.options,
        )
    }

    /// Decode and verify a base64url token.
    pub fn decode_base64(&self, token: &str) -> CwtResult<Token> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| CwtError::MalformedToken(e.to_string()))?;
        self.decode(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Algorithm;

    fn mac_key() -> KeyMaterial {
        KeyMaterial::symmetric(Algorithm::HmacSha256Truncated64, vec![0x5a; 32])
            .unwrap()
            .with_kid(b"our-secret".to_vec())
    }

    #[test]
    fn test_audience_mac_scenario() {
        let mut token = Token::new().with_mac_key(mac_key());
        token.claims_mut().set_audience("Audience1").unwrap();

        let bytes = token.encode().unwrap();
        let keys: KeySet = [mac_key()].into_iter().collect();
        let decoded = Token::decode(&bytes, &keys, &KeySet::new()).unwrap();

        assert!(decoded.has_claim("aud"));
        assert_eq!(
            decoded.claim(ClaimId::Audience).unwrap(),
            &Value::Text("Audience1".into())
        );
        assert_eq!(decoded.mac_key(), Some(&mac_key()));
        assert!(decoded.signing_key().is_none());

        // HMAC is deterministic, so re-encoding reproduces the same bytes.
        assert_eq!(decoded.encode().unwrap(), bytes);
    }

    #[test]
    fn test_encode_without_keys_fails() {
        let mut token = Token::new();
        token.set_claim("iss", Value::Text("me".into())).unwrap();
        assert!(matches!(
            token.encode(),
            Err(CwtError::NoProtectionSpecified)
        ));
    }

    #[test]
    fn test_from_claims_bytes() {
        let mut claims = ClaimsMap::new();
        claims.set_subject("erikw").unwrap();
        let token = Token::from_claims_bytes(&claims.to_bytes().unwrap()).unwrap();
        assert_eq!(token.claims().subject().unwrap(), "erikw");
        assert_eq!(token.claim_keys(), vec![ClaimKey::Int(2)]);

        assert!(matches!(
            Token::from_claims_value(Value::Text("not a map".into())),
            Err(CwtError::MalformedToken(_))
        ));
    }

    #[test]
    fn test_decoder_base64() {
        let mut token = Token::new().with_mac_key(mac_key());
        token.set_claim(ClaimId::Issuer, Value::Text("as".into())).unwrap();
        let text = token.to_base64().unwrap();

        let decoder = TokenDecoder::new([mac_key()].into_iter().collect(), KeySet::new());
        let decoded = decoder.decode_base64(&text).unwrap();
        assert_eq!(decoded.claims().issuer().unwrap(), "as");

        assert!(matches!(
            decoder.decode_base64("%%%"),
            Err(CwtError::MalformedToken(_))
        ));
    }
}
