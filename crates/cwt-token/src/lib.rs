//! # cwt-token
//!
//! CBOR Web Tokens (RFC 8392) protected by COSE envelopes (RFC 8152).
//!
//! This crate provides functionality for:
//! - Building claims maps with JWT-style aliases and per-claim type checks
//! - Wrapping claims in signature, MAC and encryption layers
//! - Unwrapping nested envelopes by trying every candidate key
//! - Loading key sets and codec options from configuration
//!
//! ## Layering
//!
//! Layers are applied innermost first and always in this order:
//!
//! | Layer | COSE structure | Tag | Key role |
//! |-------|----------------|-----|----------|
//! | Signature | `COSE_Sign1` | 18 | signing |
//! | MAC | `COSE_Mac0` | 17 | MAC |
//! | Encryption | `COSE_Encrypt0` | 16 | encryption |
//!
//! The outermost structure is wrapped in the CWT tag 61. Decoding accepts any
//! order of layers but at most one of each kind.

pub mod claims;
pub mod codec;
pub mod cose;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod resolver;
pub mod schema;
pub mod token;

pub use claims::{ClaimKey, ClaimValue, ClaimsMap};
pub use codec::{CodecOptions, ProtectionKeys, Unwrapped};
pub use crypto::{
    AesGcmCipher, Cipher, CryptoBackends, Ed25519Signer, HmacSha256Engine, MacEngine, Signer,
};
pub use error::{CryptoError, CwtError, CwtResult};
pub use keys::{Algorithm, KeyMaterial, KeyRole, KeySet, KeyType};
pub use resolver::{KeyResolver, NoKeys};
pub use schema::{ClaimId, ValueKind};
pub use token::{Token, TokenDecoder};
