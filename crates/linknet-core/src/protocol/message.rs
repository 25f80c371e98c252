//! Message types and their binary codec.
//!
//! Header layout (57 bytes):
//!
//! ```text
//! u8 kind | 32 bytes sender | 16 bytes message id | u64 timestamp (seconds)
//! ```
//!
//! Bodies are fixed per kind; see each [`Payload`] variant.

use crate::error::ProtocolError;
use crate::types::{ConnectionStatus, MessageId, PeerId, MESSAGE_ID_SIZE, PEER_ID_SIZE};

/// Size of the common message header in bytes.
pub const HEADER_SIZE: usize = 1 + PEER_ID_SIZE + MESSAGE_ID_SIZE + 8;

/// Message kinds (the header's 1-byte tag).
///
/// Tags 2 (`FILE_TRANSFER_RESPONSE`) and 5 (`PEER_DISCOVERY`) are reserved:
/// they are never sent - transfers go straight from request to first chunk,
/// and discovery runs over its own UDP path - and parsing them is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    /// Text chat message.
    Chat = 0,
    /// Offer to send a file.
    FileTransferRequest = 1,
    /// One 16 KiB (or final-shorter) slice of a file.
    FileChunk = 3,
    /// Transfer outcome, sent receiver-to-sender (or on cancel).
    FileTransferComplete = 4,
    /// Liveness probe.
    Ping = 6,
    /// Liveness reply.
    Pong = 7,
    /// Connection status advertisement.
    ConnectionNotification = 8,
}

impl MessageKind {
    /// Parse the kind tag.
    pub fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            0 => Ok(Self::Chat),
            1 => Ok(Self::FileTransferRequest),
            3 => Ok(Self::FileChunk),
            4 => Ok(Self::FileTransferComplete),
            6 => Ok(Self::Ping),
            7 => Ok(Self::Pong),
            8 => Ok(Self::ConnectionNotification),
            2 | 5 => Err(ProtocolError::Malformed(format!(
                "reserved message kind: {byte}"
            ))),
            other => Err(ProtocolError::Malformed(format!(
                "unknown message kind: {other}"
            ))),
        }
    }

    /// Convert to the wire byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// The tagged union of message bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Chat text. Body: `u32 length | UTF-8 bytes`.
    Chat {
        /// Message text.
        content: String,
    },
    /// File offer. Body: `u64 size | u32 filename length | filename`.
    FileTransferRequest {
        /// Total file size in bytes.
        file_size: u64,
        /// Basename of the offered file.
        filename: String,
    },
    /// File slice. Body:
    /// `u32 id length | id | u32 chunk index | u32 data length | data`.
    FileChunk {
        /// Transfer key (the offered filename).
        file_id: String,
        /// 0-based index; the receiver writes at `index * CHUNK_SIZE`.
        chunk_index: u32,
        /// Chunk bytes.
        data: Vec<u8>,
    },
    /// Transfer outcome. Body:
    /// `u32 id length | id | u8 success | u32 error length | error`.
    FileTransferComplete {
        /// Transfer key (the offered filename).
        file_id: String,
        /// Whether the transfer succeeded.
        success: bool,
        /// Failure reason; empty on success.
        error: String,
    },
    /// Liveness probe. Empty body.
    Ping,
    /// Liveness reply. Empty body.
    Pong,
    /// Connection status advertisement. Body: `u8 status`.
    ConnectionNotification {
        /// Advertised status.
        status: ConnectionStatus,
    },
}

impl Payload {
    /// The kind tag for this body.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Chat { .. } => MessageKind::Chat,
            Self::FileTransferRequest { .. } => MessageKind::FileTransferRequest,
            Self::FileChunk { .. } => MessageKind::FileChunk,
            Self::FileTransferComplete { .. } => MessageKind::FileTransferComplete,
            Self::Ping => MessageKind::Ping,
            Self::Pong => MessageKind::Pong,
            Self::ConnectionNotification { .. } => MessageKind::ConnectionNotification,
        }
    }
}

/// A complete message: header fields plus body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Sender id. On the wire this is the sender's own id; on delivery the
    /// network layer replaces it with the local session id so replies can
    /// be routed (peer tables are keyed by locally assigned ids only).
    pub sender: PeerId,
    /// Random id for deduplication and correlation.
    pub id: MessageId,
    /// Unix seconds at creation.
    pub timestamp: u64,
    /// Body.
    pub payload: Payload,
}

impl Message {
    /// Create a new message with a fresh id and the current timestamp.
    pub fn new(sender: PeerId, payload: Payload) -> Self {
        Self {
            sender,
            id: MessageId::random(),
            timestamp: chrono::Utc::now().timestamp().max(0) as u64,
            payload,
        }
    }

    /// The kind tag.
    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// Serialize header and body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE + 64);
        buf.push(self.kind().to_byte());
        buf.extend_from_slice(self.sender.as_bytes());
        buf.extend_from_slice(self.id.as_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());

        match &self.payload {
            Payload::Chat { content } => {
                put_len_prefixed(&mut buf, content.as_bytes());
            }
            Payload::FileTransferRequest {
                file_size,
                filename,
            } => {
                buf.extend_from_slice(&file_size.to_be_bytes());
                put_len_prefixed(&mut buf, filename.as_bytes());
            }
            Payload::FileChunk {
                file_id,
                chunk_index,
                data,
            } => {
                put_len_prefixed(&mut buf, file_id.as_bytes());
                buf.extend_from_slice(&chunk_index.to_be_bytes());
                put_len_prefixed(&mut buf, data);
            }
            Payload::FileTransferComplete {
                file_id,
                success,
                error,
            } => {
                put_len_prefixed(&mut buf, file_id.as_bytes());
                buf.push(u8::from(*success));
                put_len_prefixed(&mut buf, error.as_bytes());
            }
            Payload::Ping | Payload::Pong => {}
            Payload::ConnectionNotification { status } => {
                buf.push(status.to_byte());
            }
        }

        buf
    }

    /// Parse a message from a complete frame body.
    ///
    /// Rejects frames shorter than the minimum for their declared kind and
    /// any embedded length field that would overrun the frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_SIZE {
            return Err(ProtocolError::Malformed(format!(
                "frame shorter than header: {} bytes",
                bytes.len()
            )));
        }

        let mut reader = Reader::new(bytes);
        let kind = MessageKind::from_byte(reader.u8()?)?;

        let mut sender = [0u8; PEER_ID_SIZE];
        sender.copy_from_slice(reader.bytes(PEER_ID_SIZE)?);
        let mut id = [0u8; MESSAGE_ID_SIZE];
        id.copy_from_slice(reader.bytes(MESSAGE_ID_SIZE)?);
        let timestamp = reader.u64()?;

        let payload = match kind {
            MessageKind::Chat => Payload::Chat {
                content: reader.string()?,
            },
            MessageKind::FileTransferRequest => {
                let file_size = reader.u64()?;
                Payload::FileTransferRequest {
                    file_size,
                    filename: reader.string()?,
                }
            }
            MessageKind::FileChunk => {
                let file_id = reader.string()?;
                let chunk_index = reader.u32()?;
                let len = reader.u32()? as usize;
                Payload::FileChunk {
                    file_id,
                    chunk_index,
                    data: reader.bytes(len)?.to_vec(),
                }
            }
            MessageKind::FileTransferComplete => {
                let file_id = reader.string()?;
                let success = reader.u8()? != 0;
                Payload::FileTransferComplete {
                    file_id,
                    success,
                    error: reader.string()?,
                }
            }
            MessageKind::Ping => Payload::Ping,
            MessageKind::Pong => Payload::Pong,
            MessageKind::ConnectionNotification => Payload::ConnectionNotification {
                status: ConnectionStatus::from_byte(reader.u8()?)?,
            },
        };

        Ok(Self {
            sender: PeerId::from_bytes(sender),
            id: MessageId::from_bytes(id),
            timestamp,
            payload,
        })
    }
}

fn put_len_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

/// Bounds-checked cursor over a frame body.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| {
                ProtocolError::Malformed(format!(
                    "field of {len} bytes overruns frame at offset {}",
                    self.pos
                ))
            })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.bytes(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, ProtocolError> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.bytes(4)?);
        Ok(u32::from_be_bytes(raw))
    }

    fn u64(&mut self) -> Result<u64, ProtocolError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.bytes(8)?);
        Ok(u64::from_be_bytes(raw))
    }

    /// Read a u32-length-prefixed UTF-8 string.
    fn string(&mut self) -> Result<String, ProtocolError> {
        let len = self.u32()? as usize;
        let bytes = self.bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| ProtocolError::Malformed("invalid UTF-8 in string field".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(payload: Payload) -> Message {
        let original = Message::new(PeerId::random(), payload);
        let bytes = original.to_bytes();
        let parsed = Message::from_bytes(&bytes).expect("parse");
        assert_eq!(original, parsed);
        parsed
    }

    #[test]
    fn test_chat_roundtrip() {
        let msg = roundtrip(Payload::Chat {
            content: "Hello, world!".into(),
        });
        assert_eq!(msg.kind(), MessageKind::Chat);
    }

    #[test]
    fn test_empty_chat_roundtrip() {
        roundtrip(Payload::Chat {
            content: String::new(),
        });
    }

    #[test]
    fn test_file_request_roundtrip() {
        roundtrip(Payload::FileTransferRequest {
            file_size: 12345,
            filename: "test.txt".into(),
        });
    }

    #[test]
    fn test_file_chunk_roundtrip() {
        roundtrip(Payload::FileChunk {
            file_id: "test.txt".into(),
            chunk_index: 7,
            data: (0..255).collect(),
        });
    }

    #[test]
    fn test_file_complete_roundtrip() {
        roundtrip(Payload::FileTransferComplete {
            file_id: "test.txt".into(),
            success: false,
            error: "disk full".into(),
        });

        roundtrip(Payload::FileTransferComplete {
            file_id: "test.txt".into(),
            success: true,
            error: String::new(),
        });
    }

    #[test]
    fn test_ping_pong_roundtrip() {
        let ping = roundtrip(Payload::Ping);
        assert_eq!(ping.to_bytes().len(), HEADER_SIZE);
        roundtrip(Payload::Pong);
    }

    #[test]
    fn test_connection_notification_roundtrip() {
        roundtrip(Payload::ConnectionNotification {
            status: ConnectionStatus::Connected,
        });
    }

    #[test]
    fn test_header_layout() {
        let msg = Message::new(
            PeerId::from_bytes([0xAA; 32]),
            Payload::Chat { content: "x".into() },
        );
        let bytes = msg.to_bytes();

        assert_eq!(bytes[0], MessageKind::Chat.to_byte());
        assert_eq!(&bytes[1..33], &[0xAA; 32]);
        assert_eq!(&bytes[33..49], msg.id.as_bytes());
        assert_eq!(
            u64::from_be_bytes(bytes[49..57].try_into().expect("8 bytes")),
            msg.timestamp
        );
        // content length is big-endian right after the header
        assert_eq!(&bytes[57..61], &1u32.to_be_bytes());
    }

    #[test]
    fn test_file_chunk_layout() {
        let msg = Message {
            sender: PeerId::from_bytes([0x11; 32]),
            id: MessageId::from_bytes([0x22; 16]),
            timestamp: 0x0102030405060708,
            payload: Payload::FileChunk {
                file_id: "ab".into(),
                chunk_index: 9,
                data: vec![0xCC; 5],
            },
        };
        let bytes = msg.to_bytes();

        assert_eq!(bytes[0], 3);
        assert_eq!(&bytes[49..57], &0x0102030405060708u64.to_be_bytes());
        assert_eq!(&bytes[57..61], &2u32.to_be_bytes()); // file id length
        assert_eq!(&bytes[61..63], b"ab");
        assert_eq!(&bytes[63..67], &9u32.to_be_bytes()); // chunk index
        assert_eq!(&bytes[67..71], &5u32.to_be_bytes()); // data length
        assert_eq!(&bytes[71..76], &[0xCC; 5]);
        assert_eq!(bytes.len(), 76);
    }

    #[test]
    fn test_file_complete_layout() {
        let msg = Message {
            sender: PeerId::from_bytes([0x11; 32]),
            id: MessageId::from_bytes([0x22; 16]),
            timestamp: 7,
            payload: Payload::FileTransferComplete {
                file_id: "ab".into(),
                success: true,
                error: "err".into(),
            },
        };
        let bytes = msg.to_bytes();

        assert_eq!(bytes[0], 4);
        assert_eq!(&bytes[57..61], &2u32.to_be_bytes()); // file id length
        assert_eq!(&bytes[61..63], b"ab");
        assert_eq!(bytes[63], 1); // success flag
        assert_eq!(&bytes[64..68], &3u32.to_be_bytes()); // error length
        assert_eq!(&bytes[68..71], b"err");
        assert_eq!(bytes.len(), 71);
    }

    #[test]
    fn test_file_request_layout() {
        let msg = Message {
            sender: PeerId::from_bytes([0x11; 32]),
            id: MessageId::from_bytes([0x22; 16]),
            timestamp: 7,
            payload: Payload::FileTransferRequest {
                file_size: 0xAABB,
                filename: "f.txt".into(),
            },
        };
        let bytes = msg.to_bytes();

        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[57..65], &0xAABBu64.to_be_bytes()); // file size
        assert_eq!(&bytes[65..69], &5u32.to_be_bytes()); // filename length
        assert_eq!(&bytes[69..74], b"f.txt");
        assert_eq!(bytes.len(), 74);
    }

    #[test]
    fn test_short_frame_rejected() {
        let msg = Message::new(PeerId::random(), Payload::Ping);
        let bytes = msg.to_bytes();
        assert!(Message::from_bytes(&bytes[..HEADER_SIZE - 1]).is_err());
        assert!(Message::from_bytes(&[]).is_err());
    }

    #[test]
    fn test_truncated_body_rejected() {
        let msg = Message::new(
            PeerId::random(),
            Payload::Chat {
                content: "truncate me".into(),
            },
        );
        let bytes = msg.to_bytes();
        // The declared content length now overruns the frame.
        assert!(Message::from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_overrunning_length_field_rejected() {
        let msg = Message::new(
            PeerId::random(),
            Payload::Chat {
                content: "hi".into(),
            },
        );
        let mut bytes = msg.to_bytes();
        // Claim far more content than the frame holds.
        bytes[57..61].copy_from_slice(&u32::MAX.to_be_bytes());
        assert!(Message::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_reserved_kinds_rejected() {
        let msg = Message::new(PeerId::random(), Payload::Ping);
        let mut bytes = msg.to_bytes();
        for reserved in [2u8, 5u8] {
            bytes[0] = reserved;
            assert!(Message::from_bytes(&bytes).is_err());
        }
        bytes[0] = 0xFF;
        assert!(Message::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let msg = Message::new(
            PeerId::random(),
            Payload::Chat {
                content: "ab".into(),
            },
        );
        let mut bytes = msg.to_bytes();
        bytes[61] = 0xFF;
        bytes[62] = 0xFE;
        assert!(Message::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_invalid_status_byte_rejected() {
        let msg = Message::new(
            PeerId::random(),
            Payload::ConnectionNotification {
                status: ConnectionStatus::Connected,
            },
        );
        let mut bytes = msg.to_bytes();
        bytes[HEADER_SIZE] = 9;
        assert!(Message::from_bytes(&bytes).is_err());
    }
}
