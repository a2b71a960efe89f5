//! Hashing and signing primitives, all through `ring`.
//!
//! Digests are SHA-256. Signing keys are ECDSA over NIST P-256, held as
//! PKCS#8 documents; an address is the raw uncompressed public key, which
//! is also the form `ring` verifies against. Proof of work counts leading
//! zero bits of a digest.

use crate::error::{NodeError, Result};
use ring::digest::{Context, SHA256};
use ring::rand::SystemRandom;
use ring::signature::{
    ECDSA_P256_SHA256_FIXED, ECDSA_P256_SHA256_FIXED_SIGNING, EcdsaKeyPair, KeyPair,
    UnparsedPublicKey,
};

/// Bytes in a raw address: an uncompressed SEC1 P-256 point (0x04 prefix
/// plus two 32-byte coordinates).
pub const ADDRESS_LENGTH: usize = 65;

/// Bytes in a SHA-256 digest.
pub const HASH_LENGTH: usize = 32;

/// SHA-256 of `data`.
pub fn sha256_digest(data: &[u8]) -> Vec<u8> {
    let mut context = Context::new(&SHA256);
    context.update(data);
    context.finish().as_ref().to_vec()
}

/// How many zero bits a digest starts with. A block hash satisfies
/// difficulty `d` when this count is at least `d`.
pub fn leading_zero_bits(hash: &[u8]) -> u32 {
    let mut bits = 0;
    for byte in hash {
        if *byte == 0 {
            bits += 8;
        } else {
            bits += byte.leading_zeros();
            break;
        }
    }
    bits
}

/// Generates a fresh signing key, returned as a PKCS#8 document.
pub fn new_key_pair() -> Result<Vec<u8>> {
    EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &SystemRandom::new())
        .map(|document| document.as_ref().to_vec())
        .map_err(|e| NodeError::KeyFile(e.to_string()))
}

fn signer_from_pkcs8(pkcs8: &[u8], random: &SystemRandom) -> Result<EcdsaKeyPair> {
    EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8, random)
        .map_err(|e| NodeError::KeyFile(e.to_string()))
}

/// The address belonging to a PKCS#8 signing key.
pub fn public_key_from_pkcs8(pkcs8: &[u8]) -> Result<Vec<u8>> {
    let signer = signer_from_pkcs8(pkcs8, &SystemRandom::new())?;
    Ok(signer.public_key().as_ref().to_vec())
}

/// Signs `message` with the key in `pkcs8`, returning the fixed-length
/// signature form.
pub fn ecdsa_sign(pkcs8: &[u8], message: &[u8]) -> Result<Vec<u8>> {
    let random = SystemRandom::new();
    let signer = signer_from_pkcs8(pkcs8, &random)?;
    signer
        .sign(&random, message)
        .map(|signature| signature.as_ref().to_vec())
        .map_err(|e| NodeError::KeyFile(e.to_string()))
}

/// Whether `signature` over `message` checks out under the address
/// `public_key`.
pub fn ecdsa_verify(public_key: &[u8], signature: &[u8], message: &[u8]) -> bool {
    UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, public_key)
        .verify(message, signature)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let pkcs8 = new_key_pair().expect("Failed to generate key pair");
        let public_key = public_key_from_pkcs8(&pkcs8).expect("Failed to derive public key");
        assert_eq!(public_key.len(), ADDRESS_LENGTH);

        let message = b"spend 50 coins";
        let signature = ecdsa_sign(&pkcs8, message).expect("Failed to sign");

        assert!(ecdsa_verify(&public_key, &signature, message));
        assert!(!ecdsa_verify(&public_key, &signature, b"spend 51 coins"));
    }

    #[test]
    fn test_signature_does_not_verify_under_other_key() {
        let pkcs8 = new_key_pair().expect("Failed to generate key pair");
        let other = new_key_pair().expect("Failed to generate key pair");
        let other_public = public_key_from_pkcs8(&other).expect("Failed to derive public key");

        let message = b"spend 50 coins";
        let signature = ecdsa_sign(&pkcs8, message).expect("Failed to sign");

        assert!(!ecdsa_verify(&other_public, &signature, message));
    }

    #[test]
    fn test_leading_zero_bits() {
        assert_eq!(leading_zero_bits(&[0xff]), 0);
        assert_eq!(leading_zero_bits(&[0x7f]), 1);
        assert_eq!(leading_zero_bits(&[0x00, 0xff]), 8);
        assert_eq!(leading_zero_bits(&[0x00, 0x0f]), 12);
        assert_eq!(leading_zero_bits(&[0x00, 0x00]), 16);
    }

    #[test]
    fn test_sha256_digest_length() {
        assert_eq!(sha256_digest(b"").len(), HASH_LENGTH);
        assert_eq!(sha256_digest(b"tinycoin").len(), HASH_LENGTH);
    }
}
