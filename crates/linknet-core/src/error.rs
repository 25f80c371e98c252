//! Error types for LinkNet.
//!
//! Each subsystem has its own small error enum; the crate-level [`Error`]
//! wraps them so callers that don't care about the subsystem can use one
//! `Result` alias. I/O and protocol errors are contained at the session
//! that experienced them and are never retried internally.

use std::path::PathBuf;
use thiserror::Error;

/// Cryptographic failures.
///
/// Messages are intentionally terse; decrypt failures never say whether the
/// tag or the input framing was at fault beyond what the variant encodes.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Key generation failed.
    #[error("key generation failed")]
    KeyGen,

    /// Encryption primitive failed.
    #[error("encryption failed")]
    Encrypt,

    /// Decryption primitive failed.
    #[error("decryption failed")]
    Decrypt,

    /// Input shorter than the minimum (tag, or nonce + tag).
    #[error("input too short for authenticated decryption")]
    ShortInput,

    /// Authentication tag mismatch.
    #[error("authentication failed")]
    AuthFail,
}

/// Wire protocol violations. Any of these closes the offending session.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame or field failed validation.
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// Per-session failures.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The session is not connected.
    #[error("session closed")]
    Closed,

    /// Socket read/write failed; the session transitions to Errored.
    #[error("session i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Network manager failures.
#[derive(Error, Debug)]
pub enum NetError {
    /// The listening port could not be bound. Fatal for `start`.
    #[error("failed to bind listener: {0}")]
    Bind(std::io::Error),

    /// Outbound connect failed.
    #[error("failed to connect: {0}")]
    Connect(std::io::Error),

    /// The manager has not been started.
    #[error("network manager not running")]
    NotRunning,
}

/// File-transfer failures, surfaced via `send_file` or the completion
/// callback with `ok = false`.
#[derive(Error, Debug)]
pub enum FileError {
    /// The source path does not exist (checked before any I/O).
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    /// No connected session for the target peer.
    #[error("no connected peer")]
    NoPeer,

    /// Reading the source file failed.
    #[error("file read failed: {0}")]
    ReadFail(String),

    /// Writing the destination file failed.
    #[error("file write failed: {0}")]
    WriteFail(String),
}

/// Discovery failures. The caller logs and continues without discovery.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// Socket creation, option, or bind failed.
    #[error("discovery socket error: {0}")]
    Socket(#[from] std::io::Error),
}

/// Crate-level error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Socket or file I/O outside a session context.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Cryptography layer.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Wire protocol layer.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Peer session layer.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Network manager layer.
    #[error(transparent)]
    Net(#[from] NetError),

    /// File transfer layer.
    #[error(transparent)]
    File(#[from] FileError),

    /// Discovery layer.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

/// Result type alias using LinkNet's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
