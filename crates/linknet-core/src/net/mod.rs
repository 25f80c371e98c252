//! TCP networking: per-connection sessions and the network manager.
//!
//! One reactor (the tokio runtime) drives the listener and every session
//! socket; sessions never block on each other. The manager owns the table
//! of live sessions, keyed by the locally assigned [`PeerId`]. Failures on
//! one session are contained there and never cascade into siblings.
//!
//! [`PeerId`]: crate::types::PeerId

mod manager;
mod session;

pub use manager::{
    ConnectionCallback, ErrorCallback, MessageCallback, NetworkManager,
};
pub use session::Session;
