//! COSE algorithm identifiers used by security-context derivation.
//!
//! | Algorithm | COSE id | Key | Base IV |
//! |-----------|---------|-----|---------|
//! | AES-CCM-16-64-128 | 10 | 16 | 13 |
//! | AES-CCM-64-64-128 | 12 | 16 | 7 |
//! | AES-CCM-64-64-256 | 13 | 32 | 7 |
//! | A128GCM | 1 | 16 | 7 |
//!
//! | Key agreement | COSE id | HKDF hash |
//! |---------------|---------|-----------|
//! | ECDH-SS + HKDF-256 | -27 | SHA-256 |
//! | ECDH-SS + HKDF-512 | -28 | SHA-512 |

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::CryptoError;
use crate::hkdf::HashFunction;

/// AEAD algorithm whose key and nonce sizes the derivation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AeadAlgorithm {
    /// AES-CCM, 13-byte nonce, 64-bit tag, 128-bit key
    #[serde(rename = "AES-CCM-16-64-128")]
    AesCcm16_64_128,
    /// AES-CCM, 7-byte nonce, 64-bit tag, 128-bit key
    #[default]
    #[serde(rename = "AES-CCM-64-64-128")]
    AesCcm64_64_128,
    /// AES-CCM, 7-byte nonce, 64-bit tag, 256-bit key
    #[serde(rename = "AES-CCM-64-64-256")]
    AesCcm64_64_256,
    /// AES-GCM with a 128-bit key
    #[serde(rename = "A128GCM")]
    A128Gcm,
}

impl AeadAlgorithm {
    /// Every supported algorithm, in COSE-id order.
    pub const ALL: [Self; 4] = [
        Self::A128Gcm,
        Self::AesCcm16_64_128,
        Self::AesCcm64_64_128,
        Self::AesCcm64_64_256,
    ];

    /// COSE algorithm identifier.
    #[must_use]
    pub const fn cose_id(self) -> i64 {
        match self {
            Self::A128Gcm => 1,
            Self::AesCcm16_64_128 => 10,
            Self::AesCcm64_64_128 => 12,
            Self::AesCcm64_64_256 => 13,
        }
    }

    /// Key length in bytes.
    #[must_use]
    pub const fn key_len(self) -> usize {
        match self {
            Self::AesCcm64_64_256 => 32,
            Self::A128Gcm | Self::AesCcm16_64_128 | Self::AesCcm64_64_128 => 16,
        }
    }

    /// Base IV length in bytes.
    ///
    /// The GCM profile keeps the 56-bit base IV of the 64-bit-length CCM
    /// profiles so contexts interoperate with existing OSCOAP deployments.
    #[must_use]
    pub const fn iv_len(self) -> usize {
        match self {
            Self::AesCcm16_64_128 => 13,
            Self::A128Gcm | Self::AesCcm64_64_128 | Self::AesCcm64_64_256 => 7,
        }
    }

    /// Canonical COSE name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::A128Gcm => "A128GCM",
            Self::AesCcm16_64_128 => "AES-CCM-16-64-128",
            Self::AesCcm64_64_128 => "AES-CCM-64-64-128",
            Self::AesCcm64_64_256 => "AES-CCM-64-64-256",
        }
    }
}

impl TryFrom<i64> for AeadAlgorithm {
    type Error = CryptoError;

    fn try_from(id: i64) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|alg| alg.cose_id() == id)
            .ok_or(CryptoError::UnsupportedAlgorithm { kind: "AEAD", id })
    }
}

impl FromStr for AeadAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(id) = s.parse::<i64>() {
            return Self::try_from(id);
        }
        Self::ALL
            .into_iter()
            .find(|alg| alg.name().eq_ignore_ascii_case(s))
            .ok_or(CryptoError::InvalidInput("unknown AEAD algorithm name"))
    }
}

impl fmt::Display for AeadAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Key-agreement algorithm; only its HKDF hash matters for derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum KeyAgreementAlgorithm {
    /// ECDH static-static with HKDF-SHA-256
    #[default]
    #[serde(rename = "ECDH-SS-HKDF-256")]
    EcdhSsHkdf256,
    /// ECDH static-static with HKDF-SHA-512
    #[serde(rename = "ECDH-SS-HKDF-512")]
    EcdhSsHkdf512,
}

impl KeyAgreementAlgorithm {
    /// Every supported algorithm.
    pub const ALL: [Self; 2] = [Self::EcdhSsHkdf256, Self::EcdhSsHkdf512];

    /// COSE algorithm identifier.
    #[must_use]
    pub const fn cose_id(self) -> i64 {
        match self {
            Self::EcdhSsHkdf256 => -27,
            Self::EcdhSsHkdf512 => -28,
        }
    }

    /// Hash driving HKDF for this algorithm.
    #[must_use]
    pub const fn hash(self) -> HashFunction {
        match self {
            Self::EcdhSsHkdf256 => HashFunction::Sha256,
            Self::EcdhSsHkdf512 => HashFunction::Sha512,
        }
    }

    /// Canonical COSE name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::EcdhSsHkdf256 => "ECDH-SS-HKDF-256",
            Self::EcdhSsHkdf512 => "ECDH-SS-HKDF-512",
        }
    }
}

impl TryFrom<i64> for KeyAgreementAlgorithm {
    type Error = CryptoError;

    fn try_from(id: i64) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|alg| alg.cose_id() == id)
            .ok_or(CryptoError::UnsupportedAlgorithm {
                kind: "key agreement",
                id,
            })
    }
}

impl FromStr for KeyAgreementAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(id) = s.parse::<i64>() {
            return Self::try_from(id);
        }
        Self::ALL
            .into_iter()
            .find(|alg| alg.name().eq_ignore_ascii_case(s))
            .ok_or(CryptoError::InvalidInput("unknown key agreement algorithm name"))
    }
}

impl fmt::Display for KeyAgreementAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
