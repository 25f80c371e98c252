//! # LinkNet Core Library
//!
//! A serverless peer-to-peer chat and file-sharing system for local
//! networks. Nodes find each other over UDP multicast, open direct TCP
//! connections, and exchange chat messages and chunked file transfers
//! over a length-prefixed binary protocol.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              Application                │
//! ├─────────────────────────────────────────┤
//! │   chat   │   transfer   │   discovery   │
//! ├─────────────────────────────────────────┤
//! │           net (sessions, manager)       │
//! ├─────────────────────────────────────────┤
//! │           protocol (wire)               │
//! ├─────────────────────────────────────────┤
//! │           crypto    │    types          │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Design points
//!
//! - No central server or directory: every node is a full peer.
//! - Per-connection ephemeral peer identifiers; nothing survives a
//!   reconnect.
//! - One message-callback slot on the network layer; subsystems compose by
//!   chaining handlers (chat consumes its messages and forwards the rest).
//! - I/O and protocol failures are contained to the session that produced
//!   them and never cascade into sibling sessions.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod chat;
pub mod crypto;
pub mod discovery;
pub mod error;
pub mod net;
pub mod protocol;
pub mod transfer;
pub mod types;

pub use error::{Error, Result};
pub use types::{ConnectionStatus, MessageId, PeerId, PeerInfo};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default TCP listening port.
pub const DEFAULT_PORT: u16 = 8080;
