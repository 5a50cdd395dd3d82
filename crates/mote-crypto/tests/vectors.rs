//! Key-derivation test vectors.
//!
//! This module contains test vectors from:
//! - RFC 5869 (HKDF-SHA-256)
//! - OSCOAP interoperability vectors (CCM, GCM, salted, HKDF-512)
//!
//! These vectors ensure derived material matches other implementations
//! bit for bit.

use mote_crypto::hkdf::{HashFunction, hkdf, hkdf_extract};
use mote_crypto::{AeadAlgorithm, KeyAgreementAlgorithm, SecurityContext, derive_context};

// Helper function to decode hex strings
fn decode_hex(hex: &str) -> Vec<u8> {
    hex::decode(hex.replace(' ', "")).unwrap()
}

const SECRET: [u8; 35] = [
    0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x10,
    0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1A, 0x1B, 0x1C, 0x1D, 0x1E, 0x1F, 0x20,
    0x21, 0x22, 0x23,
];
const SENDER_ID: &[u8] = b"client";
const RECIPIENT_ID: &[u8] = b"server";
const SALT: &[u8] = b"Salt String";

fn derive(
    salt: Option<&[u8]>,
    aead: AeadAlgorithm,
    key_agreement: KeyAgreementAlgorithm,
) -> SecurityContext {
    derive_context(&SECRET, SENDER_ID, RECIPIENT_ID, salt, aead, key_agreement).unwrap()
}

fn assert_context(ctx: &SecurityContext, sender: (&str, &str), recipient: (&str, &str)) {
    assert_eq!(ctx.sender().base_iv(), decode_hex(sender.0).as_slice());
    assert_eq!(ctx.sender().key(), decode_hex(sender.1).as_slice());
    assert_eq!(ctx.recipient().base_iv(), decode_hex(recipient.0).as_slice());
    assert_eq!(ctx.recipient().key(), decode_hex(recipient.1).as_slice());
}

// ============================================================================
// RFC 5869 Test Vectors (HKDF-SHA-256)
// ============================================================================

#[test]
fn test_hkdf_rfc5869_case_1() {
    let ikm = [0x0bu8; 22];
    let salt = decode_hex("000102030405060708090a0b0c");
    let info = decode_hex("f0f1f2f3f4f5f6f7f8f9");
    let expected = decode_hex(
        "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865",
    );

    let mut okm = [0u8; 42];
    hkdf(HashFunction::Sha256, Some(salt.as_slice()), &ikm, &info, &mut okm).unwrap();

    assert_eq!(okm.to_vec(), expected);
}

#[test]
fn test_hkdf_rfc5869_case_3_no_salt() {
    // RFC 5869 Test Case 3 - zero-length salt and info
    let ikm = [0x0bu8; 22];
    let expected = decode_hex(
        "8da4e775a563c18f715f802a063c5a31b8a11f5c5ee1879ec3454e5f3c738d2d9d201395faa4b61a96c8",
    );

    let okm = hkdf_extract(HashFunction::Sha256, None, &ikm)
        .expand_to_vec(&[], 42)
        .unwrap();

    assert_eq!(okm, expected);
}

#[test]
fn test_hkdf_sha512_no_salt() {
    let ikm = [0x0bu8; 22];
    let expected = decode_hex(
        "f5fa02b18298a72a8c23898a8703472c6eb179dc204c03425c970e3b164bf90fff22d04836d0e2343bac",
    );

    let okm = hkdf_extract(HashFunction::Sha512, None, &ikm)
        .expand_to_vec(&[], 42)
        .unwrap();

    assert_eq!(okm, expected);
}

// ============================================================================
// Security Context Vectors
// ============================================================================

#[test]
fn test_derive_ccm() {
    let ctx = derive(
        None,
        AeadAlgorithm::AesCcm64_64_128,
        KeyAgreementAlgorithm::EcdhSsHkdf256,
    );

    assert_context(
        &ctx,
        ("01 53 DD FE DE 44 19", "21 64 42 DA 60 3C 51 59 2D F4 C3 D0 CD 1D 0D 48"),
        ("20 75 0B 95 F9 78 C8", "D5 CB 37 10 37 15 34 A1 CA 22 4E 19 EB 96 E9 6D"),
    );

    let swapped = derive_context(
        &SECRET,
        RECIPIENT_ID,
        SENDER_ID,
        None,
        AeadAlgorithm::AesCcm64_64_128,
        KeyAgreementAlgorithm::EcdhSsHkdf256,
    )
    .unwrap();
    assert_eq!(ctx.sender().base_iv(), swapped.recipient().base_iv());
    assert_eq!(ctx.sender().key(), swapped.recipient().key());
}

#[test]
fn test_derive_salt() {
    let ctx = derive(
        Some(SALT),
        AeadAlgorithm::AesCcm64_64_128,
        KeyAgreementAlgorithm::EcdhSsHkdf256,
    );

    assert_context(
        &ctx,
        ("35 12 7A 79 77 AD 8C", "F4 70 23 71 3B 40 A2 61 17 D4 A8 33 F7 70 C3 B0"),
        ("33 86 BA 6E 7E 0C 13", "09 F6 3F FB 75 AB 1F 10 1B 2D 41 A6 B2 2D 42 0E"),
    );
}

#[test]
fn test_derive_hash512() {
    let ctx = derive(
        Some(SALT),
        AeadAlgorithm::AesCcm64_64_128,
        KeyAgreementAlgorithm::EcdhSsHkdf512,
    );

    assert_context(
        &ctx,
        ("5E 99 CA 7A A3 B1 50", "F4 5D B2 0E EC 35 95 7E C6 40 30 F0 0C E2 7B 7D"),
        ("69 A1 79 C5 CD 74 43", "79 2C 4F D9 DE 44 E1 9B BF D6 D4 01 1B B1 B9 CC"),
    );
}

#[test]
fn test_derive_gcm() {
    let ctx = derive(
        None,
        AeadAlgorithm::A128Gcm,
        KeyAgreementAlgorithm::EcdhSsHkdf256,
    );

    assert_context(
        &ctx,
        ("6B E5 0D 26 2D F4 63", "AA 43 2E A7 F4 C0 AF 8E 1B 0D 82 D0 13 50 C1 CB"),
        ("B3 02 ED B7 FB F7 9E", "04 CF D6 F1 E2 64 F4 95 7D C3 E1 6F 32 09 11 4E"),
    );
}

#[test]
fn test_salt_changes_every_output() {
    let plain = derive(None, AeadAlgorithm::default(), KeyAgreementAlgorithm::default());
    let salted = derive(Some(SALT), AeadAlgorithm::default(), KeyAgreementAlgorithm::default());

    assert_ne!(plain.sender().key(), salted.sender().key());
    assert_ne!(plain.sender().base_iv(), salted.sender().base_iv());
    assert_ne!(plain.recipient().key(), salted.recipient().key());
    assert_ne!(plain.recipient().base_iv(), salted.recipient().base_iv());
}

#[test]
fn test_hash512_changes_every_output() {
    let sha256 = derive(None, AeadAlgorithm::default(), KeyAgreementAlgorithm::EcdhSsHkdf256);
    let sha512 = derive(None, AeadAlgorithm::default(), KeyAgreementAlgorithm::EcdhSsHkdf512);

    assert_ne!(sha256.sender().key(), sha512.sender().key());
    assert_ne!(sha256.sender().base_iv(), sha512.sender().base_iv());
    assert_ne!(sha256.recipient().key(), sha512.recipient().key());
    assert_ne!(sha256.recipient().base_iv(), sha512.recipient().base_iv());
}
