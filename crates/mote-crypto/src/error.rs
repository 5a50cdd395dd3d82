//! Cryptographic error types.

use thiserror::Error;

/// Key-derivation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Input rejected before any derivation took place
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    /// Algorithm identifier not recognized
    #[error("unsupported {kind} algorithm: {id}")]
    UnsupportedAlgorithm {
        /// Which algorithm slot the identifier was supplied for
        kind: &'static str,
        /// COSE identifier as supplied
        id: i64,
    },

    /// Requested HKDF output exceeds 255 hash blocks
    #[error("invalid HKDF output length: {0}")]
    InvalidOutputLength(usize),

    /// Context label could not be encoded
    #[error("failed to encode derivation label: {0}")]
    LabelEncoding(String),
}
