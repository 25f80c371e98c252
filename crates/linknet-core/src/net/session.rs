//! A peer session: one live TCP connection with an assigned PeerId.

use crate::error::SessionError;
use crate::protocol::{encode_frame, Message};
use crate::types::{ConnectionStatus, PeerId, PeerInfo};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tracing::debug;

/// One live connection to a remote peer.
///
/// Writes are serialized under an async mutex so a frame is always one
/// logical write. The read half is owned by the manager's read-loop task;
/// [`Session::close`] signals that task through a watch channel and shuts
/// the write half down, which is what unblocks a pending read.
pub struct Session {
    peer_id: PeerId,
    remote: SocketAddr,
    status: StdMutex<ConnectionStatus>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    shutdown_tx: watch::Sender<bool>,
    /// Ensures the Disconnected transition is reported exactly once.
    disconnect_reported: AtomicBool,
}

impl Session {
    /// Wrap a connected stream.
    ///
    /// Returns the session, the read half for the read loop, and the
    /// shutdown receiver the read loop selects on.
    pub(crate) fn new(
        stream: TcpStream,
        peer_id: PeerId,
    ) -> std::io::Result<(Arc<Self>, OwnedReadHalf, watch::Receiver<bool>)> {
        let remote = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let session = Arc::new(Self {
            peer_id,
            remote,
            status: StdMutex::new(ConnectionStatus::Connected),
            writer: Mutex::new(Some(write_half)),
            shutdown_tx,
            disconnect_reported: AtomicBool::new(false),
        });
        Ok((session, read_half, shutdown_rx))
    }

    /// The locally assigned peer id.
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// The remote endpoint.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Current status.
    pub fn status(&self) -> ConnectionStatus {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_status(&self, status: ConnectionStatus) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = status;
    }

    /// Whether the session can send.
    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// By-value projection for callers.
    pub fn peer_info(&self) -> PeerInfo {
        PeerInfo {
            id: self.peer_id,
            name: self.peer_id.short_hex(),
            addr: self.remote,
            status: self.status(),
        }
    }

    /// Serialize and write one framed message.
    ///
    /// Fails with [`SessionError::Closed`] when the session is not
    /// connected. A write failure moves the session to Errored and then
    /// closes it.
    pub async fn send(&self, message: &Message) -> Result<(), SessionError> {
        if !self.is_connected() {
            return Err(SessionError::Closed);
        }

        let frame = encode_frame(message);
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(SessionError::Closed)?;

        if let Err(e) = writer.write_all(&frame).await {
            drop(guard);
            self.set_status(ConnectionStatus::Errored);
            self.close().await;
            return Err(SessionError::Io(e));
        }
        Ok(())
    }

    /// Close the session. Idempotent.
    ///
    /// Signals the read loop, shuts down the write half, and moves the
    /// status to Disconnected.
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(true);

        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!(peer = %self.peer_id, error = %e, "error shutting down write half");
            }
        }

        self.set_status(ConnectionStatus::Disconnected);
    }

    /// Claim the right to report this session's disconnect.
    ///
    /// Returns `true` exactly once per session.
    pub(crate) fn claim_disconnect_report(&self) -> bool {
        !self.disconnect_reported.swap(true, Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("peer_id", &self.peer_id)
            .field("remote", &self.remote)
            .field("status", &self.status())
            .finish()
    }
}
