//! HKDF key derivation (RFC 5869) over the SHA-2 family.
//!
//! Provides:
//! - Hash selection for HKDF-Extract/HKDF-Expand
//! - A pseudorandom key type bound to the hash that produced it
//! - Combined extract-then-expand

use ::hkdf::Hkdf;
use sha2::{Sha256, Sha512};

use crate::CryptoError;

/// Hash function driving HMAC inside HKDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashFunction {
    /// SHA-256 (32-byte blocks of output)
    #[default]
    Sha256,
    /// SHA-512 (64-byte blocks of output)
    Sha512,
}

impl HashFunction {
    /// Digest size in bytes.
    #[must_use]
    pub const fn output_len(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    /// Largest output a single HKDF-Expand may produce (255 blocks).
    #[must_use]
    pub const fn max_expand_len(self) -> usize {
        255 * self.output_len()
    }
}

enum PrkInner {
    Sha256(Hkdf<Sha256>),
    Sha512(Hkdf<Sha512>),
}

/// Pseudorandom key produced by HKDF-Extract.
///
/// Holds the keyed HMAC state, so every expansion reuses the same extract
/// step without recomputing it.
pub struct Prk {
    hash: HashFunction,
    inner: PrkInner,
}

impl Prk {
    /// Hash this key was extracted with.
    #[must_use]
    pub fn hash(&self) -> HashFunction {
        self.hash
    }

    /// HKDF-Expand into `output`.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidOutputLength` if `output` is longer than
    /// 255 hash blocks.
    pub fn expand(&self, info: &[u8], output: &mut [u8]) -> Result<(), CryptoError> {
        let result = match &self.inner {
            PrkInner::Sha256(hk) => hk.expand(info, output),
            PrkInner::Sha512(hk) => hk.expand(info, output),
        };
        result.map_err(|_| CryptoError::InvalidOutputLength(output.len()))
    }

    /// HKDF-Expand into a freshly allocated buffer of `len` bytes.
    ///
    /// # Errors
    ///
    /// Same as [`Prk::expand`].
    pub fn expand_to_vec(&self, info: &[u8], len: usize) -> Result<Vec<u8>, CryptoError> {
        let mut output = vec![0u8; len];
        self.expand(info, &mut output)?;
        Ok(output)
    }
}

impl std::fmt::Debug for Prk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prk")
            .field("hash", &self.hash)
            .finish_non_exhaustive()
    }
}

/// HKDF-Extract: derive a pseudorandom key from input key material.
///
/// A missing salt is replaced by a string of `HashLen` zero bytes, as
/// RFC 5869 section 2.2 prescribes.
#[must_use]
pub fn hkdf_extract(hash: HashFunction, salt: Option<&[u8]>, ikm: &[u8]) -> Prk {
    let inner = match hash {
        HashFunction::Sha256 => PrkInner::Sha256(Hkdf::<Sha256>::new(salt, ikm)),
        HashFunction::Sha512 => PrkInner::Sha512(Hkdf::<Sha512>::new(salt, ikm)),
    };
    Prk { hash, inner }
}

/// HKDF: combined extract-then-expand.
///
/// # Errors
///
/// Returns `CryptoError::InvalidOutputLength` if `output` is longer than
/// 255 hash blocks.
pub fn hkdf(
    hash: HashFunction,
    salt: Option<&[u8]>,
    ikm: &[u8],
    info: &[u8],
    output: &mut [u8],
) -> Result<(), CryptoError> {
    hkdf_extract(hash, salt, ikm).expand(info, output)
}
