//! # cwt-core
//!
//! Configuration shared by CBOR Web Token producers and consumers.
//!
//! A deployment describes its keys in YAML (inline, in a separate key file,
//! or in an environment variable) together with codec settings such as the
//! external AAD fed into every COSE structure.

// Configuration types shared across all CWT crates
pub mod config;

pub use config::{CodecConfig, ConfigError, CwtConfig, KeyConfig, KeySetConfig};
