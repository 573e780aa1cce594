//! Key material and key sets for protecting and opening tokens.

use cwt_core::{KeyConfig, KeySetConfig};
use ed25519_dalek::SigningKey;
use rand::RngCore;
use std::fmt;

use crate::error::{CwtError, CwtResult};

/// COSE algorithms supported by the built-in backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// Ed25519 signatures.
    EdDSA,
    /// HMAC-SHA256 truncated to 64 bits.
    HmacSha256Truncated64,
    /// HMAC-SHA256.
    HmacSha256,
    /// AES-GCM with a 128-bit key.
    A128Gcm,
    /// AES-GCM with a 256-bit key.
    A256Gcm,
}

impl Algorithm {
    const ALL: [Algorithm; 5] = [
        Algorithm::EdDSA,
        Algorithm::HmacSha256Truncated64,
        Algorithm::HmacSha256,
        Algorithm::A128Gcm,
        Algorithm::A256Gcm,
    ];

    /// The COSE algorithm identifier.
    pub fn id(self) -> i64 {
        match self {
            Algorithm::EdDSA => -8,
            Algorithm::HmacSha256Truncated64 => 4,
            Algorithm::HmacSha256 => 5,
            Algorithm::A128Gcm => 1,
            Algorithm::A256Gcm => 3,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|alg| alg.id() == id)
    }

    /// The registered algorithm name.
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::EdDSA => "EdDSA",
            Algorithm::HmacSha256Truncated64 => "HS256/64",
            Algorithm::HmacSha256 => "HS256",
            Algorithm::A128Gcm => "A128GCM",
            Algorithm::A256Gcm => "A256GCM",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|alg| alg.name() == name)
    }

    /// The envelope layer this algorithm protects.
    pub fn role(self) -> KeyRole {
        match self {
            Algorithm::EdDSA => KeyRole::Signing,
            Algorithm::HmacSha256Truncated64 | Algorithm::HmacSha256 => KeyRole::Mac,
            Algorithm::A128Gcm | Algorithm::A256Gcm => KeyRole::Encryption,
        }
    }

    /// Required key length in bytes, when fixed.
    pub fn key_len(self) -> Option<usize> {
        match self {
            Algorithm::EdDSA | Algorithm::A256Gcm => Some(32),
            Algorithm::A128Gcm => Some(16),
            Algorithm::HmacSha256Truncated64 | Algorithm::HmacSha256 => None,
        }
    }

    /// IV length for encryption algorithms.
    pub fn iv_len(self) -> usize {
        match self {
            Algorithm::A128Gcm | Algorithm::A256Gcm => 12,
            _ => 0,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The protective role a key plays in a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    Signing,
    Mac,
    Encryption,
}

impl KeyRole {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyRole::Signing => "signature",
            KeyRole::Mac => "MAC",
            KeyRole::Encryption => "encryption",
        }
    }
}

/// COSE key types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// Symmetric key (`oct`).
    Octet,
    /// Octet key pair (`OKP`), used for Ed25519.
    Okp,
}

/// A key with its algorithm and optional key identifier.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    kty: KeyType,
    alg: Algorithm,
    kid: Option<Vec<u8>>,
    /// `k` for symmetric keys, `d` for Ed25519.
    secret: Option<Vec<u8>>,
    /// `x` for Ed25519.
    public: Option<Vec<u8>>,
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("kty", &self.kty)
            .field("alg", &self.alg)
            .field("kid", &self.kid)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("public", &self.public)
            .finish()
    }
}

impl KeyMaterial {
    /// Create a symmetric MAC or encryption key.
    pub fn symmetric(alg: Algorithm, bytes: impl Into<Vec<u8>>) -> CwtResult<Self> {
        let bytes = bytes.into();
        if alg.role() == KeyRole::Signing {
            return Err(CwtError::InvalidKey(format!("{alg} is not a symmetric algorithm")));
        }
        check_len(alg, &bytes)?;
        Ok(Self {
            kty: KeyType::Octet,
            alg,
            kid: None,
            secret: Some(bytes),
            public: None,
        })
    }

    /// Create an Ed25519 signing key from its 32-byte seed.
    pub fn ed25519_from_seed(seed: &[u8]) -> CwtResult<Self> {
        let seed: [u8; 32] = seed
            .try_into()
            .map_err(|_| CwtError::InvalidKey("Ed25519 seed must be 32 bytes".into()))?;
        let public = SigningKey::from_bytes(&seed).verifying_key().to_bytes();
        Ok(Self {
            kty: KeyType::Okp,
            alg: Algorithm::EdDSA,
            kid: None,
            secret: Some(seed.to_vec()),
            public: Some(public.to_vec()),
        })
    }

    /// Create a verification-only Ed25519 key.
    pub fn ed25519_public(public: &[u8]) -> CwtResult<Self> {
        check_len(Algorithm::EdDSA, public)?;
        Ok(Self {
            kty: KeyType::Okp,
            alg: Algorithm::EdDSA,
            kid: None,
            secret: None,
            public: Some(public.to_vec()),
        })
    }

    /// Generate a new random key for the algorithm.
    pub fn generate(alg: Algorithm) -> CwtResult<Self> {
        let mut rng = rand::rng();
        let mut bytes = vec![0u8; alg.key_len().unwrap_or(32)];
        rng.fill_bytes(&mut bytes);

        match alg.role() {
            KeyRole::Signing => Self::ed25519_from_seed(&bytes),
            _ => Self::symmetric(alg, bytes),
        }
    }

    /// Build a key from its configuration entry.
    pub fn from_config(config: &KeyConfig) -> CwtResult<Self> {
        let alg = Algorithm::from_name(&config.alg)
            .ok_or_else(|| CwtError::InvalidKey(format!("unknown algorithm {}", config.alg)))?;

        let key = match config.kty.as_str() {
            "oct" => {
                let k = config
                    .k()?
                    .ok_or_else(|| CwtError::InvalidKey("oct key requires k_hex".into()))?;
                Self::symmetric(alg, k)?
            }
            "OKP" => {
                if alg != Algorithm::EdDSA {
                    return Err(CwtError::InvalidKey(format!("OKP key cannot use {alg}")));
                }
                match (config.d()?, config.x()?) {
                    (Some(d), _) => Self::ed25519_from_seed(&d)?,
                    (None, Some(x)) => Self::ed25519_public(&x)?,
                    (None, None) => {
                        return Err(CwtError::InvalidKey("OKP key requires d_hex or x_hex".into()));
                    }
                }
            }
            other => return Err(CwtError::InvalidKey(format!("unknown key type {other}"))),
        };

        Ok(match config.kid_bytes() {
            Some(kid) => key.with_kid(kid),
            None => key,
        })
    }

    /// Attach a key identifier.
    pub fn with_kid(mut self, kid: impl Into<Vec<u8>>) -> Self {
        self.kid = Some(kid.into());
        self
    }

    pub fn kty(&self) -> KeyType {
        self.kty
    }

    pub fn alg(&self) -> Algorithm {
        self.alg
    }

    pub fn kid(&self) -> Option<&[u8]> {
        self.kid.as_deref()
    }

    /// Whether the key carries exactly this key identifier.
    pub fn has_kid(&self, kid: &[u8]) -> bool {
        self.kid.as_deref() == Some(kid)
    }

    /// Symmetric key bytes or Ed25519 seed.
    pub fn secret(&self) -> Option<&[u8]> {
        self.secret.as_deref()
    }

    /// Ed25519 public key bytes.
    pub fn public(&self) -> Option<&[u8]> {
        self.public.as_deref()
    }

    /// The public half of an asymmetric key; symmetric keys are returned as-is.
    pub fn public_key(&self) -> KeyMaterial {
        match self.kty {
            KeyType::Okp => Self {
                secret: None,
                ..self.clone()
            },
            KeyType::Octet => self.clone(),
        }
    }
}

fn check_len(alg: Algorithm, bytes: &[u8]) -> CwtResult<()> {
    match alg.key_len() {
        Some(len) if bytes.len() != len => Err(CwtError::InvalidKey(format!(
            "{alg} requires a {len}-byte key, got {}",
            bytes.len()
        ))),
        None if bytes.is_empty() => Err(CwtError::InvalidKey(format!("{alg} key is empty"))),
        _ => Ok(()),
    }
}

/// An ordered collection of keys offered as decode candidates.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: Vec<KeyMaterial>,
}

impl KeySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every key described by a key set configuration.
    pub fn from_config(config: &KeySetConfig) -> CwtResult<Self> {
        config
            .resolve()?
            .iter()
            .map(KeyMaterial::from_config)
            .collect()
    }

    pub fn add(&mut self, key: KeyMaterial) {
        self.keys.push(key);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyMaterial> {
        self.keys.iter()
    }

    /// Keys matching a header key id, in insertion order.
    ///
    /// Without a key id only keys that have none are offered; with one, only
    /// keys carrying that exact id.
    pub fn candidates<'a>(
        &'a self,
        kid: Option<&'a [u8]>,
    ) -> impl Iterator<Item = &'a KeyMaterial> + 'a {
        self.keys.iter().filter(move |key| match kid {
            None => key.kid().is_none(),
            Some(kid) => key.has_kid(kid),
        })
    }
}

impl FromIterator<KeyMaterial> for KeySet {
    fn from_iter<I: IntoIterator<Item = KeyMaterial>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}
