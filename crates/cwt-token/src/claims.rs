//! Claims map with alias-aware access and schema-checked inserts.

use chrono::{DateTime, Utc};
use serde_cbor::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{CwtError, CwtResult};
use crate::schema::{self, ClaimId, ValueKind};

/// Any CBOR value a claim may carry.
pub type ClaimValue = Value;

/// CBOR tag marking an epoch-seconds timestamp.
pub const EPOCH_TIME_TAG: u64 = 1;

/// Identifier of a claim: a canonical integer or a free-form string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ClaimKey {
    Int(i64),
    Text(String),
}

impl ClaimKey {
    /// Resolve a legacy alias to its integer id.
    ///
    /// Integers are returned untouched, so a key that is already canonical is
    /// never resolved a second time.
    pub fn canonical(self) -> ClaimKey {
        match self {
            ClaimKey::Text(name) => match schema::resolve_alias(&name) {
                Some(claim) => ClaimKey::Int(claim.id()),
                None => ClaimKey::Text(name),
            },
            key => key,
        }
    }

    /// Convert a CBOR map key into a claim key.
    pub fn from_value(value: &Value) -> CwtResult<ClaimKey> {
        match value {
            Value::Integer(i) => i64::try_from(*i).map(ClaimKey::Int).map_err(|_| {
                CwtError::MalformedToken(format!("claim identifier {i} is out of range"))
            }),
            Value::Text(text) => Ok(ClaimKey::Text(text.clone())),
            _ => Err(CwtError::UnknownClaimIdentifierKind),
        }
    }

    /// The CBOR representation used on the wire.
    pub fn to_value(&self) -> Value {
        match self {
            ClaimKey::Int(id) => Value::Integer((*id).into()),
            ClaimKey::Text(text) => Value::Text(text.clone()),
        }
    }
}

impl From<ClaimId> for ClaimKey {
    fn from(claim: ClaimId) -> Self {
        ClaimKey::Int(claim.id())
    }
}

impl From<i64> for ClaimKey {
    fn from(id: i64) -> Self {
        ClaimKey::Int(id)
    }
}

impl From<i32> for ClaimKey {
    fn from(id: i32) -> Self {
        ClaimKey::Int(id.into())
    }
}

impl From<&str> for ClaimKey {
    fn from(name: &str) -> Self {
        ClaimKey::Text(name.to_string())
    }
}

impl From<String> for ClaimKey {
    fn from(name: String) -> Self {
        ClaimKey::Text(name)
    }
}

impl fmt::Display for ClaimKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimKey::Int(id) => write!(f, "{id}"),
            ClaimKey::Text(name) => f.write_str(name),
        }
    }
}

/// The claims carried by a token, keyed by canonical identifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClaimsMap {
    claims: BTreeMap<ClaimKey, Value>,
}

impl ClaimsMap {
    /// Create an empty claims map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a claims map from a decoded CBOR value.
    ///
    /// Legacy aliases are resolved to their integer ids. When a map carries
    /// both an alias and its integer id, the integer entry is kept. Values are
    /// taken as they are: the schema only applies to `set`.
    pub fn from_value(value: Value) -> CwtResult<Self> {
        let Value::Map(entries) = value else {
            return Err(CwtError::MalformedToken("CWT must be a map".into()));
        };

        let mut claims = BTreeMap::new();
        for (key, value) in entries {
            let key = ClaimKey::from_value(&key)?;
            let aliased = matches!(key, ClaimKey::Text(_));
            let key = key.canonical();
            if aliased && matches!(key, ClaimKey::Int(_)) && claims.contains_key(&key) {
                continue;
            }
            claims.insert(key, value);
        }
        Ok(Self { claims })
    }

    /// Parse a claims map from its CBOR encoding.
    pub fn from_bytes(bytes: &[u8]) -> CwtResult<Self> {
        let value: Value = serde_cbor::from_slice(bytes)
            .map_err(|e| CwtError::MalformedToken(e.to_string()))?;
        Self::from_value(value)
    }

    /// The claims as a CBOR map.
    pub fn to_value(&self) -> Value {
        Value::Map(
            self.claims
                .iter()
                .map(|(key, value)| (key.to_value(), value.clone()))
                .collect(),
        )
    }

    /// The CBOR encoding of the claims.
    pub fn to_bytes(&self) -> CwtResult<Vec<u8>> {
        Ok(serde_cbor::to_vec(&self.to_value())?)
    }

    /// Number of claims.
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    /// Whether the map holds no claims.
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// Check whether a claim is present.
    pub fn has(&self, key: impl Into<ClaimKey>) -> bool {
        self.claims.contains_key(&key.into().canonical())
    }

    /// Read a claim.
    pub fn get(&self, key: impl Into<ClaimKey>) -> CwtResult<&Value> {
        let key = key.into().canonical();
        self.claims
            .get(&key)
            .ok_or_else(|| CwtError::ClaimNotFound {
                claim: key.to_string(),
            })
    }

    /// Set a claim, validating the value against the claim schema.
    ///
    /// Unknown integer ids and unaliased strings are stored without checks.
    /// A later write to the same canonical claim replaces the earlier one.
    pub fn set(&mut self, key: impl Into<ClaimKey>, value: Value) -> CwtResult<()> {
        let key = key.into().canonical();
        if let ClaimKey::Int(id) = key {
            if !kind_matches(schema::constraint_for(id), &value) {
                return Err(CwtError::ClaimTypeMismatch {
                    claim: key.to_string(),
                });
            }
        }
        self.claims.insert(key, value);
        Ok(())
    }

    /// Set a claim from a raw CBOR key.
    pub fn set_raw(&mut self, key: &Value, value: Value) -> CwtResult<()> {
        self.set(ClaimKey::from_value(key)?, value)
    }

    /// Set a time claim to whole seconds since the epoch, tagged as a timestamp.
    ///
    /// Only `exp`, `nbf` and `iat` accept a time.
    pub fn set_time(&mut self, claim: ClaimId, at: DateTime<Utc>) -> CwtResult<()> {
        if !claim.is_time() {
            return Err(CwtError::ClaimTypeMismatch {
                claim: ClaimKey::from(claim).to_string(),
            });
        }
        let seconds = Value::Integer(at.timestamp().into());
        self.claims.insert(
            claim.into(),
            Value::Tag(EPOCH_TIME_TAG, Box::new(seconds)),
        );
        Ok(())
    }

    /// Read a time claim, tagged or bare.
    pub fn time(&self, claim: ClaimId) -> CwtResult<DateTime<Utc>> {
        let value = self.get(claim)?;
        let value = match value {
            Value::Tag(EPOCH_TIME_TAG, inner) => inner.as_ref(),
            other => other,
        };
        let parsed = match value {
            Value::Integer(seconds) => i64::try_from(*seconds)
                .ok()
                .and_then(|seconds| DateTime::from_timestamp(seconds, 0)),
            Value::Float(seconds) if seconds.is_finite() => {
                let whole = seconds.floor();
                let nanos = ((seconds - whole) * 1e9) as u32;
                DateTime::from_timestamp(whole as i64, nanos)
            }
            _ => None,
        };
        parsed.ok_or_else(|| mismatch(claim))
    }

    /// Iterate over the stored canonical keys.
    pub fn keys(&self) -> impl Iterator<Item = &ClaimKey> {
        self.claims.keys()
    }

    /// Iterate over all claims.
    pub fn iter(&self) -> impl Iterator<Item = (&ClaimKey, &Value)> {
        self.claims.iter()
    }

    /// The `iss` claim as text.
    pub fn issuer(&self) -> CwtResult<&str> {
        self.text(ClaimId::Issuer)
    }

    /// Set the `iss` claim.
    pub fn set_issuer(&mut self, issuer: impl Into<String>) -> CwtResult<()> {
        self.set(ClaimId::Issuer, Value::Text(issuer.into()))
    }

    /// The `sub` claim as text.
    pub fn subject(&self) -> CwtResult<&str> {
        self.text(ClaimId::Subject)
    }

    /// Set the `sub` claim.
    pub fn set_subject(&mut self, subject: impl Into<String>) -> CwtResult<()> {
        self.set(ClaimId::Subject, Value::Text(subject.into()))
    }

    /// The `aud` claim as text.
    pub fn audience(&self) -> CwtResult<&str> {
        self.text(ClaimId::Audience)
    }

    /// Set the `aud` claim.
    pub fn set_audience(&mut self, audience: impl Into<String>) -> CwtResult<()> {
        self.set(ClaimId::Audience, Value::Text(audience.into()))
    }

    /// The profile extension claim, if present and textual.
    pub fn profile(&self) -> Option<&str> {
        match self.claims.get(&ClaimKey::from(schema::PROFILE)) {
            Some(Value::Text(profile)) => Some(profile),
            _ => None,
        }
    }

    /// Set the string-keyed `profile` claim.
    pub fn set_profile(&mut self, profile: impl Into<String>) -> CwtResult<()> {
        self.set(schema::PROFILE, Value::Text(profile.into()))
    }

    /// The token identifier bytes.
    pub fn cti(&self) -> CwtResult<&[u8]> {
        match untagged(self.get(ClaimId::CwtId)?) {
            Value::Bytes(bytes) => Ok(bytes),
            _ => Err(mismatch(ClaimId::CwtId)),
        }
    }

    /// Set the `cti` claim.
    pub fn set_cti(&mut self, cti: impl Into<Vec<u8>>) -> CwtResult<()> {
        self.set(ClaimId::CwtId, Value::Bytes(cti.into()))
    }

    /// The confirmation claim, an opaque map (usually a COSE key).
    pub fn cnf(&self) -> CwtResult<&BTreeMap<Value, Value>> {
        match untagged(self.get(ClaimId::Cnf)?) {
            Value::Map(map) => Ok(map),
            _ => Err(mismatch(ClaimId::Cnf)),
        }
    }

    /// Set the `cnf` claim.
    pub fn set_cnf(&mut self, cnf: BTreeMap<Value, Value>) -> CwtResult<()> {
        self.set(ClaimId::Cnf, Value::Map(cnf))
    }

    /// Whether the token carries an expiration time at or before `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.time(ClaimId::ExpirationTime) {
            Ok(expires_at) => now >= expires_at,
            Err(_) => false,
        }
    }

    /// Whether `now` is before the not-before time.
    pub fn is_premature(&self, now: DateTime<Utc>) -> bool {
        match self.time(ClaimId::NotBefore) {
            Ok(not_before) => now < not_before,
            Err(_) => false,
        }
    }

    fn text(&self, claim: ClaimId) -> CwtResult<&str> {
        match untagged(self.get(claim)?) {
            Value::Text(text) => Ok(text),
            _ => Err(mismatch(claim)),
        }
    }
}

fn mismatch(claim: ClaimId) -> CwtError {
    CwtError::ClaimTypeMismatch {
        claim: ClaimKey::from(claim).to_string(),
    }
}

/// Strip any semantic tags.
fn untagged(mut value: &Value) -> &Value {
    while let Value::Tag(_, inner) = value {
        value = inner;
    }
    value
}

fn kind_matches(kind: ValueKind, value: &Value) -> bool {
    match kind {
        ValueKind::TextString => matches!(untagged(value), Value::Text(_)),
        // Numeric claims are checked before tag stripping: any tag is a mismatch.
        ValueKind::NumericNoTag => matches!(value, Value::Integer(_) | Value::Float(_)),
        ValueKind::ByteString => matches!(untagged(value), Value::Bytes(_)),
        ValueKind::Map => matches!(untagged(value), Value::Map(_)),
        ValueKind::Unconstrained => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    #[test]
    fn test_audience_alias_access() {
        let mut claims = ClaimsMap::new();
        assert!(!claims.has(ClaimId::Audience));
        assert!(!claims.has("aud"));

        claims.set_audience("Audience1").unwrap();
        assert!(claims.has(ClaimId::Audience));
        assert!(claims.has("aud"));
        assert!(claims.has(3));
        assert_eq!(claims.get(ClaimId::Audience).unwrap(), &text("Audience1"));
        assert_eq!(claims.get("aud").unwrap(), &text("Audience1"));

        let err = claims.set(ClaimId::Audience, Value::Integer(1)).unwrap_err();
        assert!(matches!(err, CwtError::ClaimTypeMismatch { .. }));

        claims.set("aud", text("TestValue")).unwrap();
        assert_eq!(claims.audience().unwrap(), "TestValue");
        assert_eq!(claims.len(), 1);
    }

    #[test]
    fn test_issuer_alias_access() {
        let mut claims = ClaimsMap::new();
        assert!(!claims.has("iss"));
        claims.set_issuer("Issuer1").unwrap();
        assert!(claims.has("iss"));
        assert_eq!(claims.get("iss").unwrap(), &text("Issuer1"));

        assert!(claims.set("iss", Value::Bytes(vec![1])).is_err());
        claims.set("iss", text("TestValue")).unwrap();
        assert_eq!(claims.issuer().unwrap(), "TestValue");
    }

    #[test]
    fn test_every_alias_matches_canonical() {
        let mut claims = ClaimsMap::new();
        claims.set("sub", text("subject")).unwrap();
        claims
            .set(ClaimId::ExpirationTime, Value::Integer(1444064944))
            .unwrap();
        claims.set("nbf", Value::Integer(1443944944)).unwrap();
        claims.set("iat", Value::Float(1443944944.5)).unwrap();
        claims.set("cti", Value::Bytes(vec![0x0b, 0x71])).unwrap();

        for claim in ClaimId::ALL {
            let Some(alias) = claim.alias() else { continue };
            assert_eq!(claims.has(alias), claims.has(claim), "alias {alias}");
            if claims.has(claim) {
                assert_eq!(claims.get(alias).unwrap(), claims.get(claim).unwrap());
            }
        }
    }

    #[test]
    fn test_type_mismatches() {
        let mut claims = ClaimsMap::new();
        let tagged = Value::Tag(EPOCH_TIME_TAG, Box::new(Value::Integer(10)));

        for claim in [ClaimId::Issuer, ClaimId::Subject, ClaimId::Audience] {
            assert!(claims.set(claim, Value::Integer(1)).is_err());
            assert!(claims.set(claim, text("ok")).is_ok());
        }
        for claim in [ClaimId::ExpirationTime, ClaimId::NotBefore, ClaimId::IssuedAt] {
            assert!(claims.set(claim, text("soon")).is_err());
            assert!(claims.set(claim, tagged.clone()).is_err());
            assert!(claims.set(claim, Value::Integer(10)).is_ok());
        }
        assert!(claims.set(ClaimId::CwtId, text("id")).is_err());
        assert!(claims.set(ClaimId::CwtId, Value::Bytes(vec![1, 2])).is_ok());
        assert!(claims.set(ClaimId::Cnf, Value::Bytes(vec![])).is_err());
        assert!(claims.set(ClaimId::Cnf, Value::Map(BTreeMap::new())).is_ok());
    }

    #[test]
    fn test_unknown_claims_pass_through() {
        let mut claims = ClaimsMap::new();
        claims.set(42, Value::Bool(true)).unwrap();
        claims.set("custom", Value::Null).unwrap();
        claims.set_profile("coap_oscore").unwrap();

        assert_eq!(claims.get(42).unwrap(), &Value::Bool(true));
        assert_eq!(claims.get("custom").unwrap(), &Value::Null);
        assert_eq!(claims.profile(), Some("coap_oscore"));
        assert!(claims.has(ClaimKey::Text("profile".into())));
    }

    #[test]
    fn test_get_missing_claim() {
        let claims = ClaimsMap::new();
        let err = claims.get("exp").unwrap_err();
        assert!(matches!(err, CwtError::ClaimNotFound { claim } if claim == "4"));
    }

    #[test]
    fn test_set_raw_rejects_non_key_kinds() {
        let mut claims = ClaimsMap::new();
        let err = claims.set_raw(&Value::Bool(true), Value::Null).unwrap_err();
        assert!(matches!(err, CwtError::UnknownClaimIdentifierKind));

        claims.set_raw(&text("aud"), text("raw")).unwrap();
        assert_eq!(claims.audience().unwrap(), "raw");
    }

    #[test]
    fn test_set_time() {
        let mut claims = ClaimsMap::new();
        let at = Utc.with_ymd_and_hms(2015, 10, 5, 16, 55, 44).unwrap();
        claims.set_time(ClaimId::ExpirationTime, at).unwrap();

        assert_eq!(
            claims.get("exp").unwrap(),
            &Value::Tag(EPOCH_TIME_TAG, Box::new(Value::Integer(1444064144)))
        );
        assert_eq!(claims.time(ClaimId::ExpirationTime).unwrap(), at);
        assert!(claims.set_time(ClaimId::Issuer, at).is_err());
    }

    #[test]
    fn test_expiry_checks() {
        let mut claims = ClaimsMap::new();
        let now = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        assert!(!claims.is_expired(now));

        claims.set("exp", Value::Integer(now.timestamp().into())).unwrap();
        claims.set("nbf", Value::Integer((now.timestamp() + 60).into())).unwrap();
        assert!(claims.is_expired(now));
        assert!(claims.is_premature(now));
        assert!(!claims.is_expired(now - chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_bytes_roundtrip_preserves_claims() {
        let mut claims = ClaimsMap::new();
        claims.set_issuer("coap://as.example.com").unwrap();
        claims.set_cti(vec![0x0b, 0x71]).unwrap();
        claims.set_profile("p").unwrap();

        let decoded = ClaimsMap::from_bytes(&claims.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, claims);
        let keys: Vec<_> = decoded.keys().cloned().collect();
        assert_eq!(
            keys,
            vec![ClaimKey::Int(1), ClaimKey::Int(7), ClaimKey::Text("profile".into())]
        );
    }

    #[test]
    fn test_from_value_requires_map() {
        let err = ClaimsMap::from_value(Value::Array(vec![])).unwrap_err();
        assert!(matches!(err, CwtError::MalformedToken(_)));

        let mut bad = BTreeMap::new();
        bad.insert(Value::Bytes(vec![1]), Value::Null);
        let err = ClaimsMap::from_value(Value::Map(bad)).unwrap_err();
        assert!(matches!(err, CwtError::UnknownClaimIdentifierKind));
    }

    #[test]
    fn test_from_value_resolves_aliases() {
        let mut wire = BTreeMap::new();
        wire.insert(text("aud"), text("x"));
        wire.insert(text("profile"), text("p"));
        let claims = ClaimsMap::from_value(Value::Map(wire)).unwrap();
        assert!(claims.has("aud"));
        assert!(claims.has(ClaimId::Audience));
        assert_eq!(claims.get("aud").unwrap(), &text("x"));
        assert_eq!(claims.profile(), Some("p"));

        let mut wire = BTreeMap::new();
        wire.insert(text("aud"), text("x"));
        wire.insert(Value::Integer(3), text("y"));
        let claims = ClaimsMap::from_value(Value::Map(wire)).unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims.audience().unwrap(), "y");
    }

    #[test]
    fn test_out_of_range_integer_key() {
        let mut wire = BTreeMap::new();
        wire.insert(Value::Integer(u64::MAX.into()), Value::Null);
        let err = ClaimsMap::from_value(Value::Map(wire)).unwrap_err();
        assert!(matches!(err, CwtError::MalformedToken(msg) if msg.contains("out of range")));
    }

    #[test]
    fn test_time_rejects_non_finite_values() {
        let mut claims = ClaimsMap::new();
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            claims.set("exp", Value::Float(bad)).unwrap();
            assert!(matches!(
                claims.time(ClaimId::ExpirationTime),
                Err(CwtError::ClaimTypeMismatch { .. })
            ));
        }
        assert!(!claims.is_expired(Utc::now()));
    }
}
