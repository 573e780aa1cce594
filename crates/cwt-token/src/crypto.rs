//! Crypto collaborators used by the envelope codec.
//!
//! The codec never touches primitives directly: it hands opaque byte buffers
//! to a [`Signer`], a [`MacEngine`] and a [`Cipher`]. Built-in backends cover
//! Ed25519, HMAC-SHA256 and AES-GCM; callers may supply their own through
//! [`CryptoBackends`].

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::CryptoError;
use crate::keys::{Algorithm, KeyMaterial};

type HmacSha256 = Hmac<Sha256>;

/// Produces and checks signatures.
pub trait Signer {
    fn sign(&self, payload: &[u8], key: &KeyMaterial) -> Result<Vec<u8>, CryptoError>;

    fn verify(
        &self,
        payload: &[u8],
        signature: &[u8],
        key: &KeyMaterial,
    ) -> Result<bool, CryptoError>;
}

/// Computes and checks message authentication codes.
pub trait MacEngine {
    fn compute(&self, alg: Algorithm, payload: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError>;

    fn verify(
        &self,
        alg: Algorithm,
        payload: &[u8],
        tag: &[u8],
        key: &[u8],
    ) -> Result<bool, CryptoError>;
}

/// Authenticated encryption.
///
/// `decrypt` must fail when authentication fails rather than return garbage.
pub trait Cipher {
    fn encrypt(
        &self,
        alg: Algorithm,
        key: &[u8],
        iv: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    fn decrypt(
        &self,
        alg: Algorithm,
        key: &[u8],
        iv: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;
}

/// The set of collaborators used for one encode or decode call.
#[derive(Clone, Copy)]
pub struct CryptoBackends<'a> {
    pub signer: &'a dyn Signer,
    pub mac: &'a dyn MacEngine,
    pub cipher: &'a dyn Cipher,
}

impl Default for CryptoBackends<'static> {
    fn default() -> Self {
        Self {
            signer: &Ed25519Signer,
            mac: &HmacSha256Engine,
            cipher: &AesGcmCipher,
        }
    }
}

/// Ed25519 signatures (COSE `EdDSA`).
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Signer;

impl Signer for Ed25519Signer {
    fn sign(&self, payload: &[u8], key: &KeyMaterial) -> Result<Vec<u8>, CryptoError> {
        let seed: [u8; 32] = key
            .secret()
            .and_then(|secret| secret.try_into().ok())
            .ok_or(CryptoError::InvalidKeyLength { alg: "EdDSA" })?;
        let signing_key = SigningKey::from_bytes(&seed);
        Ok(signing_key.sign(payload).to_bytes().to_vec())
    }

    fn verify(
        &self,
        payload: &[u8],
        signature: &[u8],
        key: &KeyMaterial,
    ) -> Result<bool, CryptoError> {
        let public: [u8; 32] = key
            .public()
            .and_then(|public| public.try_into().ok())
            .ok_or(CryptoError::InvalidKeyLength { alg: "EdDSA" })?;
        let verifying_key =
            VerifyingKey::from_bytes(&public).map_err(|_| CryptoError::AuthenticationFailed)?;
        let signature =
            Signature::from_slice(signature).map_err(|_| CryptoError::AuthenticationFailed)?;
        Ok(verifying_key.verify(payload, &signature).is_ok())
    }
}

/// HMAC-SHA256, full length or truncated to 64 bits.
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacSha256Engine;

impl HmacSha256Engine {
    fn keyed(alg: Algorithm, key: &[u8]) -> Result<HmacSha256, CryptoError> {
        if !matches!(
            alg,
            Algorithm::HmacSha256 | Algorithm::HmacSha256Truncated64
        ) {
            return Err(CryptoError::UnsupportedAlgorithm(alg.name()));
        }
        <HmacSha256 as Mac>::new_from_slice(key)
            .map_err(|_| CryptoError::InvalidKeyLength { alg: alg.name() })
    }
}

impl MacEngine for HmacSha256Engine {
    fn compute(&self, alg: Algorithm, payload: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut mac = Self::keyed(alg, key)?;
        mac.update(payload);
        let mut tag = mac.finalize().into_bytes().to_vec();
        if alg == Algorithm::HmacSha256Truncated64 {
            tag.truncate(8);
        }
        Ok(tag)
    }

    fn verify(
        &self,
        alg: Algorithm,
        payload: &[u8],
        tag: &[u8],
        key: &[u8],
    ) -> Result<bool, CryptoError> {
        let mut mac = Self::keyed(alg, key)?;
        mac.update(payload);
        let verified = match alg {
            Algorithm::HmacSha256Truncated64 => {
                tag.len() == 8 && mac.verify_truncated_left(tag).is_ok()
            }
            _ => mac.verify_slice(tag).is_ok(),
        };
        Ok(verified)
    }
}

/// AES-GCM with 128 or 256-bit keys and a 96-bit IV.
#[derive(Debug, Clone, Copy, Default)]
pub struct AesGcmCipher;

fn seal<C: Aead + KeyInit>(
    alg: Algorithm,
    key: &[u8],
    iv: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher =
        C::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength { alg: alg.name() })?;
    if iv.len() != alg.iv_len() {
        return Err(CryptoError::EncryptionFailed(format!(
            "IV must be {} bytes",
            alg.iv_len()
        )));
    }
    let nonce = aes_gcm::aead::Nonce::<C>::from_slice(iv);
    cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
}

fn open<C: Aead + KeyInit>(
    alg: Algorithm,
    key: &[u8],
    iv: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher =
        C::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength { alg: alg.name() })?;
    if iv.len() != alg.iv_len() {
        return Err(CryptoError::AuthenticationFailed);
    }
    let nonce = aes_gcm::aead::Nonce::<C>::from_slice(iv);
    cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::AuthenticationFailed)
}

impl Cipher for AesGcmCipher {
    fn encrypt(
        &self,
        alg: Algorithm,
        key: &[u8],
        iv: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        match alg {
            Algorithm::A128Gcm => seal::<Aes128Gcm>(alg, key, iv, aad, plaintext),
            Algorithm::A256Gcm => seal::<Aes256Gcm>(alg, key, iv, aad, plaintext),
            _ => Err(CryptoError::UnsupportedAlgorithm(alg.name())),
        }
    }

    fn decrypt(
        &self,
        alg: Algorithm,
        key: &[u8],
        iv: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        match alg {
            Algorithm::A128Gcm => open::<Aes128Gcm>(alg, key, iv, aad, ciphertext),
            Algorithm::A256Gcm => open::<Aes256Gcm>(alg, key, iv, aad, ciphertext),
            _ => Err(CryptoError::UnsupportedAlgorithm(alg.name())),
        }
    }
}
