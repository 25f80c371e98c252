//! Cryptographic primitives for LinkNet.
//!
//! Well-audited primitives only:
//!
//! - **XChaCha20-Poly1305**: authenticated encryption (24-byte nonce,
//!   16-byte tag)
//! - **X25519**: key agreement for the authenticated box
//! - **Ed25519**: detached signatures
//! - **SHA-256**: hashing
//! - **HKDF-SHA256**: key derivation
//!
//! All operations are stateless and thread-safe. Secret key material is
//! zeroized on drop. Every encryption uses a freshly generated nonce;
//! nonces are never reused under the same key.

mod aead;
mod keys;
mod sign;

pub use aead::{
    decrypt, encrypt, generate_key, Nonce, KEY_SIZE, NONCE_SIZE, TAG_SIZE,
};
pub use keys::{asym_decrypt, asym_encrypt, BoxKeypair, BoxPublicKey, BoxSecretKey};
pub use sign::{
    sign, verify, SignatureKeypair, SIGNATURE_SIZE, SIGNING_KEY_SIZE, VERIFY_KEY_SIZE,
};

use crate::error::CryptoError;
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Size of a hash digest in bytes.
pub const HASH_SIZE: usize = 32;

/// Hash data with SHA-256.
///
/// Deterministic and collision-resistant; used for file integrity checks.
pub fn hash(data: &[u8]) -> [u8; HASH_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Derive key material using HKDF-SHA256.
pub fn hkdf_derive(
    salt: Option<&[u8]>,
    input_key_material: &[u8],
    info: &[u8],
    output_length: usize,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let hkdf = Hkdf::<Sha256>::new(salt, input_key_material);
    let mut output = Zeroizing::new(vec![0u8; output_length]);
    hkdf.expand(info, &mut output)
        .map_err(|_| CryptoError::KeyGen)?;
    Ok(output)
}

/// Generate cryptographically secure random bytes.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let a = hash(b"linknet");
        let b = hash(b"linknet");
        assert_eq!(a, b);
        assert_ne!(a, hash(b"linkneT"));
        assert_eq!(a.len(), HASH_SIZE);
    }

    #[test]
    fn test_random_bytes_distinct() {
        let a: [u8; 32] = random_bytes();
        let b: [u8; 32] = random_bytes();
        assert_ne!(a, b);
    }

    #[test]
    fn test_hkdf_derive() {
        let out1 = hkdf_derive(Some(b"salt"), b"ikm", b"info", 32).expect("derive");
        let out2 = hkdf_derive(Some(b"salt"), b"ikm", b"info", 32).expect("derive");
        assert_eq!(&*out1, &*out2);

        let out3 = hkdf_derive(Some(b"salt"), b"ikm", b"other", 32).expect("derive");
        assert_ne!(&*out1, &*out3);
    }
}
