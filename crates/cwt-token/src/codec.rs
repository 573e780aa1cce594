//! Layered envelope encoding and decoding.
//!
//! Encoding signs innermost, then MACs, then encrypts, and wraps the result
//! in the CWT tag. Decoding peels layers from the outside in, trying every
//! candidate key a resolver offers for each layer, until a bare claims map
//! remains.

use cwt_core::CodecConfig;
use rand::RngCore;
use serde_cbor::Value;

use crate::claims::ClaimsMap;
use crate::cose::{
    Envelope, EnvelopeKind, HEADER_IV, Headers, TAG_CWT, enc_structure, mac_structure,
    sig_structure,
};
use crate::crypto::CryptoBackends;
use crate::error::{CwtError, CwtResult};
use crate::keys::{Algorithm, KeyMaterial, KeyRole};
use crate::resolver::KeyResolver;

/// Settings shared by encode and decode.
#[derive(Debug, Clone, Default)]
pub struct CodecOptions {
    /// Application data authenticated by every layer but never transmitted.
    pub external_aad: Vec<u8>,
    /// Reject input without the outer CWT tag.
    pub require_token_tag: bool,
}

impl CodecOptions {
    pub fn from_config(config: &CodecConfig) -> CwtResult<Self> {
        Ok(Self {
            external_aad: config.external_aad()?,
            require_token_tag: config.require_token_tag,
        })
    }
}

/// Keys applied when encoding, at most one per role.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtectionKeys<'a> {
    pub signing: Option<&'a KeyMaterial>,
    pub mac: Option<&'a KeyMaterial>,
    pub encryption: Option<&'a KeyMaterial>,
}

impl ProtectionKeys<'_> {
    pub fn is_empty(&self) -> bool {
        self.signing.is_none() && self.mac.is_none() && self.encryption.is_none()
    }
}

/// The result of a successful decode.
#[derive(Debug, Clone, Default)]
pub struct Unwrapped {
    pub claims: ClaimsMap,
    pub signing_key: Option<KeyMaterial>,
    pub mac_key: Option<KeyMaterial>,
    pub encryption_key: Option<KeyMaterial>,
}

/// Encode claims under every key that is set.
pub fn encode(
    claims: &ClaimsMap,
    keys: ProtectionKeys<'_>,
    backends: &CryptoBackends<'_>,
    options: &CodecOptions,
) -> CwtResult<Vec<u8>> {
    if keys.is_empty() {
        return Err(CwtError::NoProtectionSpecified);
    }

    let mut payload = claims.to_bytes()?;
    let mut outer = None;

    if let Some(key) = keys.signing {
        let envelope = sign1(payload, key, backends, options)?;
        payload = envelope.to_bytes()?;
        outer = Some(envelope);
    }

    if let Some(key) = keys.mac {
        let envelope = mac0(payload, key, backends, options)?;
        payload = envelope.to_bytes()?;
        outer = Some(envelope);
    }

    if let Some(key) = keys.encryption {
        let envelope = encrypt0(payload, key, backends, options)?;
        outer = Some(envelope);
    }

    let Some(outer) = outer else {
        return Err(CwtError::NoProtectionSpecified);
    };
    let token = Value::Tag(TAG_CWT, Box::new(outer.to_value()));
    Ok(serde_cbor::to_vec(&token)?)
}

fn require_role(key: &KeyMaterial, role: KeyRole) -> CwtResult<()> {
    if key.alg().role() != role {
        return Err(CwtError::InvalidKey(format!(
            "{} cannot be used for {}",
            key.alg(),
            role.as_str()
        )));
    }
    Ok(())
}

fn secret(key: &KeyMaterial) -> CwtResult<&[u8]> {
    key.secret()
        .ok_or_else(|| CwtError::InvalidKey(format!("{} key has no secret part", key.alg())))
}

fn sign1(
    payload: Vec<u8>,
    key: &KeyMaterial,
    backends: &CryptoBackends<'_>,
    options: &CodecOptions,
) -> CwtResult<Envelope> {
    require_role(key, KeyRole::Signing)?;
    let headers = Headers::new(key.alg(), key.kid())?;
    let to_sign = sig_structure(headers.protected_bytes(), &options.external_aad, &payload)?;
    let signature = backends.signer.sign(&to_sign, key)?;

    tracing::debug!(alg = %key.alg(), kid_present = key.kid().is_some(), "Applied signature layer");
    Ok(Envelope::Sign1 {
        headers,
        payload,
        signature,
    })
}

fn mac0(
    payload: Vec<u8>,
    key: &KeyMaterial,
    backends: &CryptoBackends<'_>,
    options: &CodecOptions,
) -> CwtResult<Envelope> {
    require_role(key, KeyRole::Mac)?;
    let kid = key
        .kid()
        .ok_or_else(|| CwtError::InvalidKey("MAC key must carry a key id".into()))?;
    let headers = Headers::new(key.alg(), Some(kid))?;
    let to_mac = mac_structure(headers.protected_bytes(), &options.external_aad, &payload)?;
    let tag = backends.mac.compute(key.alg(), &to_mac, secret(key)?)?;

    tracing::debug!(alg = %key.alg(), "Applied MAC layer");
    Ok(Envelope::Mac0 {
        headers,
        payload,
        tag,
    })
}

fn encrypt0(
    payload: Vec<u8>,
    key: &KeyMaterial,
    backends: &CryptoBackends<'_>,
    options: &CodecOptions,
) -> CwtResult<Envelope> {
    require_role(key, KeyRole::Encryption)?;
    let mut iv = vec![0u8; key.alg().iv_len()];
    rand::rng().fill_bytes(&mut iv);

    let mut headers = Headers::new(key.alg(), key.kid())?;
    headers.unprotected.insert(HEADER_IV, Value::Bytes(iv.clone()));

    let aad = enc_structure(headers.protected_bytes(), &options.external_aad)?;
    let ciphertext = backends
        .cipher
        .encrypt(key.alg(), secret(key)?, &iv, &aad, &payload)?;

    tracing::debug!(
        alg = %key.alg(),
        kid_present = key.kid().is_some(),
        "Applied encryption layer"
    );
    Ok(Envelope::Encrypt0 {
        headers,
        ciphertext,
    })
}

/// Decode a token, verifying or decrypting every layer.
///
/// `keys` supplies MAC and decryption candidates; `sign_keys` supplies
/// signature verification candidates.
pub fn decode(
    bytes: &[u8],
    keys: &dyn KeyResolver,
    sign_keys: &dyn KeyResolver,
    backends: &CryptoBackends<'_>,
    options: &CodecOptions,
) -> CwtResult<Unwrapped> {
    let mut value = match parse(bytes)? {
        Value::Tag(TAG_CWT, inner) => *inner,
        _ if options.require_token_tag => {
            return Err(CwtError::MalformedToken("missing CWT tag".into()));
        }
        other => other,
    };

    let mut result = Unwrapped::default();
    loop {
        let (tag, body) = single_tag(value)?;
        let kind = EnvelopeKind::from_tag(tag)
            .ok_or_else(|| CwtError::MalformedToken(format!("unknown envelope tag {tag}")))?;
        let envelope = Envelope::from_value(kind, body)?;

        let content = match envelope {
            Envelope::Encrypt0 {
                headers,
                ciphertext,
            } => {
                if result.encryption_key.is_some() {
                    return Err(CwtError::UnsupportedNesting { kind: "encryption" });
                }
                let (key, plaintext) =
                    open_encrypt0(&headers, &ciphertext, keys, backends, options)?;
                result.encryption_key = Some(key);
                plaintext
            }
            Envelope::Mac0 {
                headers,
                payload,
                tag,
            } => {
                if result.mac_key.is_some() {
                    return Err(CwtError::UnsupportedNesting { kind: "MAC" });
                }
                let key = verify_mac0(&headers, &payload, &tag, keys, backends, options)?;
                result.mac_key = Some(key);
                payload
            }
            Envelope::Sign1 {
                headers,
                payload,
                signature,
            } => {
                if result.signing_key.is_some() {
                    return Err(CwtError::UnsupportedNesting { kind: "signature" });
                }
                let key = verify_sign1(
                    &headers, &payload, &signature, sign_keys, backends, options,
                )?;
                result.signing_key = Some(key);
                payload
            }
        };

        value = parse(&content)?;
        if !matches!(value, Value::Tag(..)) {
            break;
        }
    }

    result.claims = ClaimsMap::from_value(value)?;
    Ok(result)
}

fn parse(bytes: &[u8]) -> CwtResult<Value> {
    serde_cbor::from_slice(bytes).map_err(|e| CwtError::MalformedToken(e.to_string()))
}

/// Every envelope carries exactly one tag naming its kind.
fn single_tag(value: Value) -> CwtResult<(u64, Value)> {
    match value {
        Value::Tag(_, ref inner) if matches!(**inner, Value::Tag(..)) => Err(
            CwtError::MalformedToken("envelope carries more than one tag".into()),
        ),
        Value::Tag(tag, inner) => Ok((tag, *inner)),
        _ => Err(CwtError::MalformedToken("envelope is not tagged".into())),
    }
}

/// Whether a candidate can be tried against a layer using `alg`.
fn usable(key: &KeyMaterial, alg: Algorithm) -> bool {
    key.alg() == alg
}

fn open_encrypt0(
    headers: &Headers,
    ciphertext: &[u8],
    keys: &dyn KeyResolver,
    backends: &CryptoBackends<'_>,
    options: &CodecOptions,
) -> CwtResult<(KeyMaterial, Vec<u8>)> {
    let alg = headers.alg()?;
    let iv = headers
        .iv()
        .ok_or_else(|| CwtError::MalformedToken("missing IV header".into()))?;
    let aad = enc_structure(headers.protected_bytes(), &options.external_aad)?;

    let candidates = keys.resolve(KeyRole::Encryption, &headers.protected, &headers.unprotected);
    tracing::debug!(
        alg = %alg,
        kid_present = headers.kid().is_some(),
        candidates = candidates.len(),
        "Opening encryption layer"
    );

    for candidate in candidates {
        let Some(secret) = candidate.secret().filter(|_| usable(&candidate, alg)) else {
            tracing::debug!(alg = %candidate.alg(), "Skipping unusable candidate key");
            continue;
        };
        match backends.cipher.decrypt(alg, secret, iv, &aad, ciphertext) {
            Ok(plaintext) => return Ok((candidate, plaintext)),
            Err(e) => tracing::debug!(error = %e, "Candidate key rejected"),
        }
    }

    tracing::warn!(kind = EnvelopeKind::Encrypt0.as_str(), "No candidate key opened the layer");
    Err(CwtError::KeyNotFound {
        operation: "decrypt",
    })
}

fn verify_mac0(
    headers: &Headers,
    payload: &[u8],
    tag: &[u8],
    keys: &dyn KeyResolver,
    backends: &CryptoBackends<'_>,
    options: &CodecOptions,
) -> CwtResult<KeyMaterial> {
    let alg = headers.alg()?;
    let to_mac = mac_structure(headers.protected_bytes(), &options.external_aad, payload)?;

    let candidates = keys.resolve(KeyRole::Mac, &headers.protected, &headers.unprotected);
    tracing::debug!(
        alg = %alg,
        kid_present = headers.kid().is_some(),
        candidates = candidates.len(),
        "Verifying MAC layer"
    );

    for candidate in candidates {
        let Some(secret) = candidate.secret().filter(|_| usable(&candidate, alg)) else {
            tracing::debug!(alg = %candidate.alg(), "Skipping unusable candidate key");
            continue;
        };
        match backends.mac.verify(alg, &to_mac, tag, secret) {
            Ok(true) => return Ok(candidate),
            Ok(false) => tracing::debug!("Candidate key rejected"),
            Err(e) => tracing::debug!(error = %e, "Candidate key rejected"),
        }
    }

    tracing::warn!(kind = EnvelopeKind::Mac0.as_str(), "No candidate key opened the layer");
    Err(CwtError::KeyNotFound {
        operation: "verify the MAC",
    })
}

fn verify_sign1(
    headers: &Headers,
    payload: &[u8],
    signature: &[u8],
    sign_keys: &dyn KeyResolver,
    backends: &CryptoBackends<'_>,
    options: &CodecOptions,
) -> CwtResult<KeyMaterial> {
    let alg = headers.alg()?;
    let to_verify = sig_structure(headers.protected_bytes(), &options.external_aad, payload)?;

    let candidates = sign_keys.resolve(KeyRole::Signing, &headers.protected, &headers.unprotected);
    tracing::debug!(
        alg = %alg,
        kid_present = headers.kid().is_some(),
        candidates = candidates.len(),
        "Verifying signature layer"
    );

    for candidate in candidates {
        if !usable(&candidate, alg) {
            tracing::debug!(alg = %candidate.alg(), "Skipping unusable candidate key");
            continue;
        }
        match backends.signer.verify(&to_verify, signature, &candidate) {
            Ok(true) => return Ok(candidate),
            Ok(false) => tracing::debug!("Candidate key rejected"),
            Err(e) => tracing::debug!(error = %e, "Candidate key rejected"),
        }
    }

    tracing::warn!(kind = EnvelopeKind::Sign1.as_str(), "No candidate key opened the layer");
    Err(CwtError::KeyNotFound {
        operation: "validate the signature",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cose;
    use crate::keys::KeySet;
    use crate::resolver::NoKeys;

    fn claims() -> ClaimsMap {
        let mut claims = ClaimsMap::new();
        claims.set_issuer("coap://as.example.com").unwrap();
        claims.set_audience("coap://light.example.com").unwrap();
        claims
    }

    fn mac_key() -> KeyMaterial {
        KeyMaterial::symmetric(Algorithm::HmacSha256Truncated64, vec![0x42; 32])
            .unwrap()
            .with_kid(b"our-secret".to_vec())
    }

    fn enc_key() -> KeyMaterial {
        KeyMaterial::symmetric(Algorithm::A128Gcm, vec![0x24; 16]).unwrap()
    }

    fn keys(list: &[&KeyMaterial]) -> KeySet {
        list.iter().map(|key| (*key).clone()).collect()
    }

    #[test]
    fn test_encode_requires_protection() {
        let err = encode(
            &claims(),
            ProtectionKeys::default(),
            &CryptoBackends::default(),
            &CodecOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CwtError::NoProtectionSpecified));
    }

    #[test]
    fn test_encoded_token_carries_cwt_tag() {
        let key = mac_key();
        let bytes = encode(
            &claims(),
            ProtectionKeys {
                mac: Some(&key),
                ..Default::default()
            },
            &CryptoBackends::default(),
            &CodecOptions::default(),
        )
        .unwrap();
        // tag(61) followed by tag(17)
        assert_eq!(&bytes[..3], &[0xd8, 0x3d, 0xd1]);
    }

    #[test]
    fn test_mac_layer_requires_kid() {
        let key = KeyMaterial::symmetric(Algorithm::HmacSha256, vec![1; 32]).unwrap();
        let err = encode(
            &claims(),
            ProtectionKeys {
                mac: Some(&key),
                ..Default::default()
            },
            &CryptoBackends::default(),
            &CodecOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CwtError::InvalidKey(_)));
    }

    #[test]
    fn test_key_in_wrong_role_rejected() {
        let key = enc_key();
        let err = encode(
            &claims(),
            ProtectionKeys {
                signing: Some(&key),
                ..Default::default()
            },
            &CryptoBackends::default(),
            &CodecOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CwtError::InvalidKey(_)));
    }

    #[test]
    fn test_mac_then_encrypt_roundtrip() {
        let mac = mac_key();
        let enc = enc_key();
        let backends = CryptoBackends::default();
        let options = CodecOptions::default();
        let bytes = encode(
            &claims(),
            ProtectionKeys {
                signing: None,
                mac: Some(&mac),
                encryption: Some(&enc),
            },
            &backends,
            &options,
        )
        .unwrap();

        let set = keys(&[&mac, &enc]);
        let decoded = decode(&bytes, &set, &NoKeys, &backends, &options).unwrap();
        assert_eq!(decoded.claims, claims());
        assert_eq!(decoded.mac_key, Some(mac));
        assert_eq!(decoded.encryption_key, Some(enc));
        assert!(decoded.signing_key.is_none());
    }

    #[test]
    fn test_external_aad_must_match() {
        let mac = mac_key();
        let backends = CryptoBackends::default();
        let sender = CodecOptions {
            external_aad: b"context".to_vec(),
            require_token_tag: false,
        };
        let bytes = encode(
            &claims(),
            ProtectionKeys {
                mac: Some(&mac),
                ..Default::default()
            },
            &backends,
            &sender,
        )
        .unwrap();

        let set = keys(&[&mac]);
        assert!(decode(&bytes, &set, &NoKeys, &backends, &sender).is_ok());
        let err = decode(&bytes, &set, &NoKeys, &backends, &CodecOptions::default()).unwrap_err();
        assert!(matches!(err, CwtError::KeyNotFound { .. }));
    }

    #[test]
    fn test_untagged_token_policy() {
        let mac = mac_key();
        let backends = CryptoBackends::default();
        let bytes = encode(
            &claims(),
            ProtectionKeys {
                mac: Some(&mac),
                ..Default::default()
            },
            &backends,
            &CodecOptions::default(),
        )
        .unwrap();
        // Drop the two-byte tag(61) prefix.
        let bare = &bytes[2..];
        let set = keys(&[&mac]);

        assert!(decode(bare, &set, &NoKeys, &backends, &CodecOptions::default()).is_ok());
        let strict = CodecOptions {
            require_token_tag: true,
            ..Default::default()
        };
        let err = decode(bare, &set, &NoKeys, &backends, &strict).unwrap_err();
        assert!(matches!(err, CwtError::MalformedToken(_)));
    }

    #[test]
    fn test_tag_count_enforced() {
        let backends = CryptoBackends::default();
        let options = CodecOptions::default();

        let tagged_map = Value::Tag(TAG_CWT, Box::new(claims().to_value()));
        let bare_map = serde_cbor::to_vec(&tagged_map).unwrap();
        let err = decode(&bare_map, &NoKeys, &NoKeys, &backends, &options).unwrap_err();
        assert!(matches!(err, CwtError::MalformedToken(_)));

        let double = Value::Tag(
            cose::TAG_MAC0,
            Box::new(Value::Tag(cose::TAG_MAC0, Box::new(Value::Array(vec![])))),
        );
        let err = decode(
            &serde_cbor::to_vec(&double).unwrap(),
            &NoKeys,
            &NoKeys,
            &backends,
            &options,
        )
        .unwrap_err();
        assert!(matches!(err, CwtError::MalformedToken(_)));

        let unknown = Value::Tag(98, Box::new(Value::Array(vec![])));
        let err = decode(
            &serde_cbor::to_vec(&unknown).unwrap(),
            &NoKeys,
            &NoKeys,
            &backends,
            &options,
        )
        .unwrap_err();
        assert!(matches!(err, CwtError::MalformedToken(_)));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let err = decode(
            &[0xff, 0x00],
            &NoKeys,
            &NoKeys,
            &CryptoBackends::default(),
            &CodecOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CwtError::MalformedToken(_)));
    }

    #[test]
    fn test_codec_options_from_config() {
        let config = CodecConfig {
            external_aad_hex: Some("cafe".into()),
            require_token_tag: true,
        };
        let options = CodecOptions::from_config(&config).unwrap();
        assert_eq!(options.external_aad, vec![0xca, 0xfe]);
        assert!(options.require_token_tag);
    }
}
