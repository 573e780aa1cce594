//! COSE single-recipient envelopes: `COSE_Sign1`, `COSE_Mac0` and
//! `COSE_Encrypt0` (RFC 8152), plus the structures their signatures, MACs and
//! ciphertexts are computed over.

use serde_cbor::Value;
use std::collections::BTreeMap;

use crate::error::{CwtError, CwtResult};
use crate::keys::Algorithm;

pub const TAG_ENCRYPT0: u64 = 16;
pub const TAG_MAC0: u64 = 17;
pub const TAG_SIGN1: u64 = 18;
/// Outer tag marking a CBOR Web Token.
pub const TAG_CWT: u64 = 61;

pub const HEADER_ALG: i64 = 1;
pub const HEADER_KID: i64 = 4;
pub const HEADER_IV: i64 = 5;

/// Header parameters keyed by integer label.
pub type HeaderMap = BTreeMap<i64, Value>;

/// Protected and unprotected headers of one envelope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Headers {
    pub protected: HeaderMap,
    pub unprotected: HeaderMap,
    /// The protected bucket exactly as it was received or will be sent.
    protected_bytes: Vec<u8>,
}

impl Headers {
    /// Headers for a new envelope: algorithm protected, key id unprotected.
    pub fn new(alg: Algorithm, kid: Option<&[u8]>) -> CwtResult<Self> {
        let mut protected = HeaderMap::new();
        protected.insert(HEADER_ALG, Value::Integer(alg.id().into()));

        let mut unprotected = HeaderMap::new();
        if let Some(kid) = kid {
            unprotected.insert(HEADER_KID, Value::Bytes(kid.to_vec()));
        }

        let protected_bytes = encode_header_map(&protected)?;
        Ok(Self {
            protected,
            unprotected,
            protected_bytes,
        })
    }

    /// Serialized protected bucket.
    pub fn protected_bytes(&self) -> &[u8] {
        &self.protected_bytes
    }

    /// Look a label up, protected bucket first.
    pub fn find(&self, label: i64) -> Option<&Value> {
        self.protected
            .get(&label)
            .or_else(|| self.unprotected.get(&label))
    }

    /// The algorithm declared by the envelope.
    pub fn alg(&self) -> CwtResult<Algorithm> {
        match self.find(HEADER_ALG) {
            Some(Value::Integer(id)) => i64::try_from(*id)
                .ok()
                .and_then(Algorithm::from_id)
                .ok_or_else(|| CwtError::MalformedToken(format!("unsupported algorithm {id}"))),
            Some(_) => Err(CwtError::MalformedToken("algorithm must be an integer".into())),
            None => Err(CwtError::MalformedToken("missing algorithm header".into())),
        }
    }

    /// The key id hint, if any.
    pub fn kid(&self) -> Option<&[u8]> {
        match self.find(HEADER_KID) {
            Some(Value::Bytes(kid)) => Some(kid),
            _ => None,
        }
    }

    /// The IV of an encrypted envelope.
    pub fn iv(&self) -> Option<&[u8]> {
        match self.find(HEADER_IV) {
            Some(Value::Bytes(iv)) => Some(iv),
            _ => None,
        }
    }

    fn parse(protected: Value, unprotected: Value) -> CwtResult<Self> {
        let Value::Bytes(protected_bytes) = protected else {
            return Err(CwtError::MalformedToken("protected header must be a byte string".into()));
        };
        let protected = if protected_bytes.is_empty() {
            HeaderMap::new()
        } else {
            let value: Value = serde_cbor::from_slice(&protected_bytes)
                .map_err(|e| CwtError::MalformedToken(e.to_string()))?;
            header_map_from_value(value)?
        };
        Ok(Self {
            protected,
            unprotected: header_map_from_value(unprotected)?,
            protected_bytes,
        })
    }

    fn unprotected_value(&self) -> Value {
        header_map_to_value(&self.unprotected)
    }
}

fn header_map_to_value(map: &HeaderMap) -> Value {
    Value::Map(
        map.iter()
            .map(|(label, value)| (Value::Integer((*label).into()), value.clone()))
            .collect(),
    )
}

/// Text labels are private-use parameters this codec does not interpret.
fn header_map_from_value(value: Value) -> CwtResult<HeaderMap> {
    let Value::Map(entries) = value else {
        return Err(CwtError::MalformedToken("header bucket must be a map".into()));
    };
    Ok(entries
        .into_iter()
        .filter_map(|(label, value)| match label {
            Value::Integer(label) => i64::try_from(label).ok().map(|label| (label, value)),
            _ => None,
        })
        .collect())
}

/// An empty protected bucket is sent as a zero-length byte string.
fn encode_header_map(map: &HeaderMap) -> CwtResult<Vec<u8>> {
    if map.is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_cbor::to_vec(&header_map_to_value(map))?)
}

/// The kind of protection an envelope applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Sign1,
    Mac0,
    Encrypt0,
}

impl EnvelopeKind {
    pub fn tag(self) -> u64 {
        match self {
            EnvelopeKind::Sign1 => TAG_SIGN1,
            EnvelopeKind::Mac0 => TAG_MAC0,
            EnvelopeKind::Encrypt0 => TAG_ENCRYPT0,
        }
    }

    pub fn from_tag(tag: u64) -> Option<Self> {
        match tag {
            TAG_SIGN1 => Some(EnvelopeKind::Sign1),
            TAG_MAC0 => Some(EnvelopeKind::Mac0),
            TAG_ENCRYPT0 => Some(EnvelopeKind::Encrypt0),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeKind::Sign1 => "COSE_Sign1",
            EnvelopeKind::Mac0 => "COSE_Mac0",
            EnvelopeKind::Encrypt0 => "COSE_Encrypt0",
        }
    }

    fn arity(self) -> usize {
        match self {
            EnvelopeKind::Encrypt0 => 3,
            EnvelopeKind::Sign1 | EnvelopeKind::Mac0 => 4,
        }
    }
}

/// One layer of protection around a payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Sign1 {
        headers: Headers,
        payload: Vec<u8>,
        signature: Vec<u8>,
    },
    Mac0 {
        headers: Headers,
        payload: Vec<u8>,
        tag: Vec<u8>,
    },
    Encrypt0 {
        headers: Headers,
        ciphertext: Vec<u8>,
    },
}

impl Envelope {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::Sign1 { .. } => EnvelopeKind::Sign1,
            Envelope::Mac0 { .. } => EnvelopeKind::Mac0,
            Envelope::Encrypt0 { .. } => EnvelopeKind::Encrypt0,
        }
    }

    pub fn headers(&self) -> &Headers {
        match self {
            Envelope::Sign1 { headers, .. }
            | Envelope::Mac0 { headers, .. }
            | Envelope::Encrypt0 { headers, .. } => headers,
        }
    }

    /// Parse the untagged body of an envelope of the given kind.
    pub fn from_value(kind: EnvelopeKind, body: Value) -> CwtResult<Self> {
        let Value::Array(items) = body else {
            return Err(CwtError::MalformedToken(format!(
                "{} must be an array",
                kind.as_str()
            )));
        };
        if items.len() != kind.arity() {
            return Err(CwtError::MalformedToken(format!(
                "{} must have {} elements",
                kind.as_str(),
                kind.arity()
            )));
        }

        let mut items = items.into_iter();
        let mut next = || items.next().unwrap_or(Value::Null);
        let headers = Headers::parse(next(), next())?;

        let envelope = match kind {
            EnvelopeKind::Sign1 => Envelope::Sign1 {
                headers,
                payload: bytes_field(next(), "payload")?,
                signature: bytes_field(next(), "signature")?,
            },
            EnvelopeKind::Mac0 => Envelope::Mac0 {
                headers,
                payload: bytes_field(next(), "payload")?,
                tag: bytes_field(next(), "tag")?,
            },
            EnvelopeKind::Encrypt0 => Envelope::Encrypt0 {
                headers,
                ciphertext: bytes_field(next(), "ciphertext")?,
            },
        };
        Ok(envelope)
    }

    /// The tagged CBOR value of the envelope.
    pub fn to_value(&self) -> Value {
        let headers = self.headers();
        let mut items = vec![
            Value::Bytes(headers.protected_bytes().to_vec()),
            headers.unprotected_value(),
        ];
        match self {
            Envelope::Sign1 {
                payload, signature, ..
            } => {
                items.push(Value::Bytes(payload.clone()));
                items.push(Value::Bytes(signature.clone()));
            }
            Envelope::Mac0 { payload, tag, .. } => {
                items.push(Value::Bytes(payload.clone()));
                items.push(Value::Bytes(tag.clone()));
            }
            Envelope::Encrypt0 { ciphertext, .. } => {
                items.push(Value::Bytes(ciphertext.clone()));
            }
        }
        Value::Tag(self.kind().tag(), Box::new(Value::Array(items)))
    }

    pub fn to_bytes(&self) -> CwtResult<Vec<u8>> {
        Ok(serde_cbor::to_vec(&self.to_value())?)
    }
}

fn bytes_field(value: Value, name: &str) -> CwtResult<Vec<u8>> {
    match value {
        Value::Bytes(bytes) => Ok(bytes),
        // A nil payload means detached content, which tokens never use.
        _ => Err(CwtError::MalformedToken(format!("{name} must be a byte string"))),
    }
}

/// `Sig_structure` for `COSE_Sign1`.
pub fn sig_structure(protected: &[u8], external_aad: &[u8], payload: &[u8]) -> CwtResult<Vec<u8>> {
    to_be_authenticated("Signature1", protected, external_aad, Some(payload))
}

/// `MAC_structure` for `COSE_Mac0`.
pub fn mac_structure(protected: &[u8], external_aad: &[u8], payload: &[u8]) -> CwtResult<Vec<u8>> {
    to_be_authenticated("MAC0", protected, external_aad, Some(payload))
}

/// `Enc_structure` for `COSE_Encrypt0`, used as the AEAD associated data.
pub fn enc_structure(protected: &[u8], external_aad: &[u8]) -> CwtResult<Vec<u8>> {
    to_be_authenticated("Encrypt0", protected, external_aad, None)
}

fn to_be_authenticated(
    context: &str,
    protected: &[u8],
    external_aad: &[u8],
    payload: Option<&[u8]>,
) -> CwtResult<Vec<u8>> {
    let mut items = vec![
        Value::Text(context.to_string()),
        Value::Bytes(protected.to_vec()),
        Value::Bytes(external_aad.to_vec()),
    ];
    if let Some(payload) = payload {
        items.push(Value::Bytes(payload.to_vec()));
    }
    Ok(serde_cbor::to_vec(&Value::Array(items))?)
}
