//! # Mote Crypto
//!
//! Security-context derivation for the Mote object-security layer.
//!
//! This crate provides:
//! - HKDF extract/expand over SHA-256 and SHA-512
//! - COSE algorithm tables (AEAD key/IV sizes, key-agreement hashes)
//! - Sender/recipient key and base-IV derivation from a shared secret
//!
//! Only key *material* is produced here; AEAD operations and sequence
//! numbers belong to the consumer.
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Output |
//! |----------|-----------|--------|
//! | KDF | HKDF-SHA-256 / HKDF-SHA-512 | per-algorithm |
//! | Context label | CBOR `[id, alg, type, L]` | N/A |
//! | Default AEAD sizing | AES-CCM-64-64-128 | 16-byte key, 7-byte IV |

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod algorithm;
pub mod context;
pub mod error;
pub mod hkdf;

pub use algorithm::{AeadAlgorithm, KeyAgreementAlgorithm};
pub use context::{
    ContextDeriver, EndpointContext, SecurityContext, derive_context, derive_context_from_ids,
};
pub use error::CryptoError;
pub use hkdf::HashFunction;
