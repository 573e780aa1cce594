//! Error types for the token crate.

use thiserror::Error;

/// Errors that can occur during CWT operations.
#[derive(Debug, Error)]
pub enum CwtError {
    /// The token bytes do not have the expected structure.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// A claim value does not match the schema for its identifier.
    #[error("claim value type is incorrect for claim {claim}")]
    ClaimTypeMismatch { claim: String },

    /// A claim was read but is not present.
    #[error("claim not found: {claim}")]
    ClaimNotFound { claim: String },

    /// More than one envelope of the same kind was found.
    #[error("multiple {kind} nesting is not supported")]
    UnsupportedNesting { kind: &'static str },

    /// No candidate key could unwrap an envelope layer.
    #[error("no key found to {operation}")]
    KeyNotFound { operation: &'static str },

    /// Encoding was requested without any signing, MAC or encryption key.
    #[error("must either encrypt, sign or MAC a CWT")]
    NoProtectionSpecified,

    /// A claim identifier is neither an integer nor a text string.
    #[error("claim identifier must be an integer or a string")]
    UnknownClaimIdentifierKind,

    /// CBOR serialization failed.
    #[error("CBOR encoding error: {0}")]
    MalformedData(#[from] serde_cbor::Error),

    /// Key material cannot be used for the requested operation.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A crypto backend failed while protecting a token.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] cwt_core::ConfigError),
}

/// Failures reported by signer, MAC and cipher backends.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key bytes have the wrong shape for the algorithm.
    #[error("invalid key length for {alg}")]
    InvalidKeyLength { alg: &'static str },

    /// The algorithm is not handled by this backend.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(&'static str),

    /// Authenticated decryption or signature parsing failed.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
}

/// Result alias used throughout the crate.
pub type CwtResult<T> = Result<T, CwtError>;
