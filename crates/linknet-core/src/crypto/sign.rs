//! Ed25519 detached signatures.

use crate::error::CryptoError;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::fmt;

/// Size of a detached signature in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// Size of a signing secret key in bytes (seed + public half).
pub const SIGNING_KEY_SIZE: usize = 64;

/// Size of a verifying public key in bytes.
pub const VERIFY_KEY_SIZE: usize = 32;

/// An Ed25519 signing keypair.
///
/// The secret key is zeroized on drop by the underlying implementation.
pub struct SignatureKeypair {
    signing: SigningKey,
}

impl SignatureKeypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Restore from the 64-byte secret key.
    pub fn from_secret_bytes(bytes: &[u8; SIGNING_KEY_SIZE]) -> Result<Self, CryptoError> {
        let signing = SigningKey::from_keypair_bytes(bytes).map_err(|_| CryptoError::KeyGen)?;
        Ok(Self { signing })
    }

    /// The 32-byte verifying public key.
    pub fn public_bytes(&self) -> [u8; VERIFY_KEY_SIZE] {
        self.signing.verifying_key().to_bytes()
    }

    /// The 64-byte secret key (seed followed by public half).
    ///
    /// # Security
    /// Handle with care - this exposes secret key material.
    pub fn secret_bytes(&self) -> [u8; SIGNING_KEY_SIZE] {
        self.signing.to_keypair_bytes()
    }

    /// Produce a detached signature over `message`.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing.sign(message).to_bytes()
    }
}

impl fmt::Debug for SignatureKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureKeypair")
            .field("public", &hex::encode(&self.public_bytes()[..8]))
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Sign `message` with a raw 64-byte secret key.
pub fn sign(
    message: &[u8],
    secret: &[u8; SIGNING_KEY_SIZE],
) -> Result<[u8; SIGNATURE_SIZE], CryptoError> {
    let keypair = SignatureKeypair::from_secret_bytes(secret)?;
    Ok(keypair.sign(message))
}

/// Verify a detached signature.
///
/// Returns `false` - never an error - for a wrong-length signature, an
/// invalid public key, or a signature that does not verify.
pub fn verify(message: &[u8], signature: &[u8], public: &[u8; VERIFY_KEY_SIZE]) -> bool {
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(public) else {
        return false;
    };
    key.verify(message, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let keypair = SignatureKeypair::generate();
        let message = b"attest to this";

        let signature = keypair.sign(message);
        assert_eq!(signature.len(), SIGNATURE_SIZE);
        assert!(verify(message, &signature, &keypair.public_bytes()));
    }

    #[test]
    fn test_tampered_message_fails() {
        let keypair = SignatureKeypair::generate();
        let signature = keypair.sign(b"original");
        assert!(!verify(b"altered", &signature, &keypair.public_bytes()));
    }

    #[test]
    fn test_tampered_signature_fails() {
        let keypair = SignatureKeypair::generate();
        let mut signature = keypair.sign(b"message");
        signature[0] ^= 0x01;
        assert!(!verify(b"message", &signature, &keypair.public_bytes()));
    }

    #[test]
    fn test_bad_signature_length_is_false() {
        let keypair = SignatureKeypair::generate();
        assert!(!verify(b"message", &[0u8; 63], &keypair.public_bytes()));
        assert!(!verify(b"message", &[], &keypair.public_bytes()));
    }

    #[test]
    fn test_wrong_key_fails() {
        let keypair = SignatureKeypair::generate();
        let other = SignatureKeypair::generate();
        let signature = keypair.sign(b"message");
        assert!(!verify(b"message", &signature, &other.public_bytes()));
    }

    #[test]
    fn test_keypair_persistence() {
        let original = SignatureKeypair::generate();
        let restored =
            SignatureKeypair::from_secret_bytes(&original.secret_bytes()).expect("restore");
        assert_eq!(original.public_bytes(), restored.public_bytes());

        let signature = restored.sign(b"still me");
        assert!(verify(b"still me", &signature, &original.public_bytes()));
    }
}
