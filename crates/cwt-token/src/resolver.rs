//! Candidate key lookup for envelope layers.

use crate::cose::{HEADER_KID, HeaderMap};
use crate::keys::{KeyMaterial, KeyRole, KeySet};
use serde_cbor::Value;

/// Supplies the keys to try, in order, for one envelope layer.
///
/// The key id header is only a hint: every returned candidate is tried until
/// one verifies or decrypts.
pub trait KeyResolver {
    fn resolve(
        &self,
        role: KeyRole,
        protected: &HeaderMap,
        unprotected: &HeaderMap,
    ) -> Vec<KeyMaterial>;
}

impl KeyResolver for KeySet {
    fn resolve(
        &self,
        _role: KeyRole,
        protected: &HeaderMap,
        unprotected: &HeaderMap,
    ) -> Vec<KeyMaterial> {
        let kid = protected
            .get(&HEADER_KID)
            .or_else(|| unprotected.get(&HEADER_KID))
            .and_then(|kid| match kid {
                Value::Bytes(kid) => Some(kid.as_slice()),
                _ => None,
            });
        self.candidates(kid).cloned().collect()
    }
}

impl<F> KeyResolver for F
where
    F: Fn(KeyRole, &HeaderMap, &HeaderMap) -> Vec<KeyMaterial>,
{
    fn resolve(
        &self,
        role: KeyRole,
        protected: &HeaderMap,
        unprotected: &HeaderMap,
    ) -> Vec<KeyMaterial> {
        self(role, protected, unprotected)
    }
}

/// Resolver that never offers a key.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoKeys;

impl KeyResolver for NoKeys {
    fn resolve(&self, _role: KeyRole, _: &HeaderMap, _: &HeaderMap) -> Vec<KeyMaterial> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Algorithm;

    fn mac_key(byte: u8) -> KeyMaterial {
        KeyMaterial::symmetric(Algorithm::HmacSha256, vec![byte; 32]).unwrap()
    }

    #[test]
    fn test_key_set_uses_unprotected_kid() {
        let set: KeySet = [
            mac_key(1).with_kid(b"one".to_vec()),
            mac_key(2).with_kid(b"two".to_vec()),
        ]
        .into_iter()
        .collect();

        let mut unprotected = HeaderMap::new();
        unprotected.insert(HEADER_KID, Value::Bytes(b"two".to_vec()));

        let keys = set.resolve(KeyRole::Mac, &HeaderMap::new(), &unprotected);
        assert_eq!(keys.len(), 1);
        assert!(keys[0].has_kid(b"two"));
    }

    #[test]
    fn test_closure_resolver() {
        let resolver = |role: KeyRole, _: &HeaderMap, _: &HeaderMap| {
            if role == KeyRole::Signing {
                vec![mac_key(9)]
            } else {
                Vec::new()
            }
        };
        let empty = HeaderMap::new();
        assert_eq!(resolver.resolve(KeyRole::Signing, &empty, &empty).len(), 1);
        assert!(resolver.resolve(KeyRole::Mac, &empty, &empty).is_empty());
        assert!(NoKeys.resolve(KeyRole::Mac, &empty, &empty).is_empty());
    }
}
