//! Wire protocol: message codec and framing.
//!
//! Every message is a 57-byte common header followed by a kind-specific
//! body, wrapped on the wire in a 4-byte big-endian length prefix. All
//! multi-byte integers are big-endian. Parsing is strict: a frame shorter
//! than its kind's minimum, or any embedded length field that would overrun
//! the frame, is a [`ProtocolError::Malformed`](crate::error::ProtocolError)
//! and closes the session.

mod frame;
mod message;

pub use frame::{encode_frame, read_frame, write_frame, LEN_PREFIX_SIZE, MAX_FRAME_SIZE};
pub use message::{Message, MessageKind, Payload, HEADER_SIZE};
