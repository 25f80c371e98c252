//! X25519-based authenticated public-key encryption (box).
//!
//! `asym_encrypt` binds the sender: the payload key is derived from the
//! X25519 agreement between the sender's secret key and the receiver's
//! public key, so only those two parties can produce or open the blob.
//! The nonce is chosen internally and prepended to the output:
//!
//! ```text
//! nonce (24 bytes) || ciphertext || tag (16 bytes)
//! ```

use super::aead::{self, Nonce, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
use super::hkdf_derive;
use crate::error::CryptoError;
use rand::rngs::OsRng;
use std::fmt;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

/// HKDF info label for box key derivation.
const BOX_KDF_INFO: &[u8] = b"linknet box v1";

/// An X25519 public key.
#[derive(Clone, PartialEq, Eq, Zeroize)]
pub struct BoxPublicKey([u8; KEY_SIZE]);

impl BoxPublicKey {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    fn to_dalek(&self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

impl fmt::Debug for BoxPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoxPublicKey({}...)", hex::encode(&self.0[..8]))
    }
}

/// An X25519 secret key, zeroized on drop.
pub struct BoxSecretKey(StaticSecret);

impl BoxSecretKey {
    /// Restore from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Export the raw bytes.
    ///
    /// # Security
    /// Handle with care - this exposes secret key material.
    pub fn to_bytes(&self) -> [u8; KEY_SIZE] {
        self.0.to_bytes()
    }
}

impl fmt::Debug for BoxSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoxSecretKey([REDACTED])")
    }
}

/// An X25519 keypair for authenticated public-key encryption.
pub struct BoxKeypair {
    /// Public half.
    pub public: BoxPublicKey,
    /// Secret half.
    pub secret: BoxSecretKey,
}

impl BoxKeypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = BoxPublicKey(*PublicKey::from(&secret).as_bytes());
        Self {
            public,
            secret: BoxSecretKey(secret),
        }
    }
}

impl fmt::Debug for BoxKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxKeypair")
            .field("public", &self.public)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Derive the shared symmetric key for a (secret, public) pair.
///
/// X25519 is symmetric in its arguments, so
/// `derive(sender_secret, receiver_public) == derive(receiver_secret,
/// sender_public)` - both ends arrive at the same payload key.
fn derive_box_key(
    secret: &BoxSecretKey,
    public: &BoxPublicKey,
) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
    let shared = secret.0.diffie_hellman(&public.to_dalek());
    let derived = hkdf_derive(None, shared.as_bytes(), BOX_KDF_INFO, KEY_SIZE)?;

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    key.copy_from_slice(&derived);
    Ok(key)
}

/// Encrypt for a receiver, authenticated by the sender's key.
///
/// Output is `nonce || ciphertext || tag`, i.e.
/// `NONCE_SIZE + plaintext.len() + TAG_SIZE` bytes.
pub fn asym_encrypt(
    plaintext: &[u8],
    receiver_public: &BoxPublicKey,
    sender_secret: &BoxSecretKey,
) -> Result<Vec<u8>, CryptoError> {
    let key = derive_box_key(sender_secret, receiver_public)?;
    let nonce = Nonce::random();
    let ciphertext = aead::encrypt(&key, &nonce, plaintext)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(nonce.as_bytes());
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

/// Open a blob produced by [`asym_encrypt`].
///
/// Fails with [`CryptoError::ShortInput`] when the blob cannot hold the
/// nonce and tag, and [`CryptoError::AuthFail`] when authentication fails.
pub fn asym_decrypt(
    blob: &[u8],
    sender_public: &BoxPublicKey,
    receiver_secret: &BoxSecretKey,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if blob.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::ShortInput);
    }

    let nonce_bytes: [u8; NONCE_SIZE] = blob[..NONCE_SIZE]
        .try_into()
        .map_err(|_| CryptoError::ShortInput)?;
    let nonce = Nonce::from_bytes(nonce_bytes);

    let key = derive_box_key(receiver_secret, sender_public)?;
    aead::decrypt(&key, &nonce, &blob[NONCE_SIZE..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_roundtrip() {
        let sender = BoxKeypair::generate();
        let receiver = BoxKeypair::generate();
        let plaintext = b"sealed for your eyes only";

        let blob = asym_encrypt(plaintext, &receiver.public, &sender.secret).expect("encrypt");
        assert_eq!(blob.len(), NONCE_SIZE + plaintext.len() + TAG_SIZE);

        let opened = asym_decrypt(&blob, &sender.public, &receiver.secret).expect("decrypt");
        assert_eq!(&*opened, plaintext);
    }

    #[test]
    fn test_box_wrong_recipient_fails() {
        let sender = BoxKeypair::generate();
        let receiver = BoxKeypair::generate();
        let eve = BoxKeypair::generate();

        let blob = asym_encrypt(b"secret", &receiver.public, &sender.secret).expect("encrypt");
        assert!(asym_decrypt(&blob, &sender.public, &eve.secret).is_err());
    }

    #[test]
    fn test_box_tamper_fails() {
        let sender = BoxKeypair::generate();
        let receiver = BoxKeypair::generate();

        let mut blob = asym_encrypt(b"secret", &receiver.public, &sender.secret).expect("encrypt");
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(matches!(
            asym_decrypt(&blob, &sender.public, &receiver.secret),
            Err(CryptoError::AuthFail)
        ));
    }

    #[test]
    fn test_box_short_input() {
        let sender = BoxKeypair::generate();
        let receiver = BoxKeypair::generate();
        assert!(matches!(
            asym_decrypt(&[0u8; NONCE_SIZE + TAG_SIZE - 1], &sender.public, &receiver.secret),
            Err(CryptoError::ShortInput)
        ));
    }

    #[test]
    fn test_secret_key_roundtrip() {
        let kp = BoxKeypair::generate();
        let restored = BoxSecretKey::from_bytes(kp.secret.to_bytes());
        assert_eq!(kp.secret.to_bytes(), restored.to_bytes());
    }
}
