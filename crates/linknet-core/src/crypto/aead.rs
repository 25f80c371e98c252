//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! The extended 24-byte nonce is large enough to draw from the OS RNG for
//! every encryption without bookkeeping.

use crate::error::CryptoError;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

/// Size of a symmetric key in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Size of a nonce in bytes (192 bits).
pub const NONCE_SIZE: usize = 24;

/// Size of the authentication tag in bytes (128 bits).
pub const TAG_SIZE: usize = 16;

/// A nonce for AEAD encryption. Must be unique per key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    /// Create a new random nonce.
    pub fn random() -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

impl From<[u8; NONCE_SIZE]> for Nonce {
    fn from(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }
}

/// Generate a new random symmetric key.
///
/// The container zeroizes the key when dropped.
pub fn generate_key() -> Zeroizing<[u8; KEY_SIZE]> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    OsRng.fill_bytes(&mut *key);
    key
}

/// Encrypt plaintext.
///
/// Returns ciphertext with an appended 16-byte authentication tag, so the
/// output is exactly `plaintext.len() + TAG_SIZE` bytes.
pub fn encrypt(
    key: &[u8; KEY_SIZE],
    nonce: &Nonce,
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .encrypt(XNonce::from_slice(nonce.as_bytes()), plaintext)
        .map_err(|_| CryptoError::Encrypt)
}

/// Decrypt ciphertext produced by [`encrypt`].
///
/// Fails with [`CryptoError::ShortInput`] when the input cannot even hold
/// the tag, and [`CryptoError::AuthFail`] when the tag does not verify.
/// The plaintext container is zeroized on drop.
pub fn decrypt(
    key: &[u8; KEY_SIZE],
    nonce: &Nonce,
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::ShortInput);
    }

    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let plaintext = cipher
        .decrypt(XNonce::from_slice(nonce.as_bytes()), ciphertext)
        .map_err(|_| CryptoError::AuthFail)?;

    Ok(Zeroizing::new(plaintext))
}
