//! Shared identifier and peer types.

use crate::error::ProtocolError;
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use std::net::SocketAddr;

/// Size of a peer identifier in bytes.
pub const PEER_ID_SIZE: usize = 32;

/// Size of a message identifier in bytes.
pub const MESSAGE_ID_SIZE: usize = 16;

/// Opaque per-connection peer identifier.
///
/// Generated from the OS RNG when a session is created (on either side of
/// the connection) and never reused across reconnects. Two concurrent
/// sessions never share an id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub [u8; PEER_ID_SIZE]);

impl PeerId {
    /// Generate a fresh random id.
    pub fn random() -> Self {
        let mut bytes = [0u8; PEER_ID_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; PEER_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; PEER_ID_SIZE] {
        &self.0
    }

    /// Short hex form for display (first 8 bytes).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.short_hex())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_hex())
    }
}

/// Random per-message identifier, used for deduplication and
/// acknowledgement correlation.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(pub [u8; MESSAGE_ID_SIZE]);

impl MessageId {
    /// Generate a fresh random id.
    pub fn random() -> Self {
        let mut bytes = [0u8; MESSAGE_ID_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; MESSAGE_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; MESSAGE_ID_SIZE] {
        &self.0
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// Connection status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionStatus {
    /// No connection.
    Disconnected = 0,
    /// TCP connect in flight.
    Connecting = 1,
    /// Connected and able to send.
    Connected = 2,
    /// A fatal error occurred; the session is about to disconnect.
    Errored = 3,
}

impl ConnectionStatus {
    /// Parse from the wire byte.
    pub fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            0 => Ok(Self::Disconnected),
            1 => Ok(Self::Connecting),
            2 => Ok(Self::Connected),
            3 => Ok(Self::Errored),
            other => Err(ProtocolError::Malformed(format!(
                "unknown connection status: {other:#04x}"
            ))),
        }
    }

    /// Convert to the wire byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// By-value projection of a live session.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Locally assigned session id.
    pub id: PeerId,
    /// Display name. Peers have no identity exchange, so this is the
    /// short hex of the session id.
    pub name: String,
    /// Remote endpoint.
    pub addr: SocketAddr,
    /// Current status.
    pub status: ConnectionStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_ids_are_distinct() {
        let a = PeerId::random();
        let b = PeerId::random();
        assert_ne!(a, b);
    }

    #[test]
    fn message_id_display_len() {
        let id = MessageId([7u8; MESSAGE_ID_SIZE]);
        assert_eq!(format!("{id}").len(), 16);
    }

    #[test]
    fn status_byte_roundtrip() {
        for status in [
            ConnectionStatus::Disconnected,
            ConnectionStatus::Connecting,
            ConnectionStatus::Connected,
            ConnectionStatus::Errored,
        ] {
            assert_eq!(
                ConnectionStatus::from_byte(status.to_byte()).expect("roundtrip"),
                status
            );
        }
        assert!(ConnectionStatus::from_byte(4).is_err());
    }
}
