//! The network manager: listener, outbound connects, and the peer table.

use super::session::Session;
use crate::error::{Error, NetError};
use crate::protocol::{read_frame, Message, Payload};
use crate::types::{ConnectionStatus, PeerId, PeerInfo};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Callback for inbound messages. Invoked from the session's read-loop
/// task; must not block indefinitely.
pub type MessageCallback = Arc<dyn Fn(Message) + Send + Sync>;

/// Callback for session status transitions. Each transition of a given
/// session is reported exactly once.
pub type ConnectionCallback = Arc<dyn Fn(PeerId, ConnectionStatus) + Send + Sync>;

/// Callback for asynchronous network errors.
pub type ErrorCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Accepts inbound connections, opens outbound ones, owns the table of
/// live sessions, and dispatches sends and broadcasts.
///
/// The table is keyed by the locally assigned [`PeerId`] only; two sessions
/// to the same remote host are permitted and distinguished by their ids.
/// Inbound messages are attributed to the session they arrived on: the
/// wire's sender field is replaced with the local session id before the
/// message callback runs, so replies route through the local table.
///
/// Callback slots are single-slot; the last registration wins. Subsystems
/// that need to share the message slot chain handlers (see
/// [`ChatDispatcher`](crate::chat::ChatDispatcher)).
#[derive(Clone)]
pub struct NetworkManager {
    inner: Arc<Inner>,
}

struct Inner {
    /// This node's own id, used as the sender of locally originated
    /// messages.
    local_id: PeerId,
    sessions: StdMutex<HashMap<PeerId, Arc<Session>>>,
    message_cb: StdRwLock<Option<MessageCallback>>,
    connection_cb: StdRwLock<Option<ConnectionCallback>>,
    error_cb: StdRwLock<Option<ErrorCallback>>,
    running: AtomicBool,
    local_port: AtomicU16,
    shutdown_tx: watch::Sender<bool>,
    accept_handle: StdMutex<Option<JoinHandle<()>>>,
}

impl NetworkManager {
    /// Create a manager with a fresh local node id. Call
    /// [`start`](Self::start) to begin accepting connections.
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                local_id: PeerId::random(),
                sessions: StdMutex::new(HashMap::new()),
                message_cb: StdRwLock::new(None),
                connection_cb: StdRwLock::new(None),
                error_cb: StdRwLock::new(None),
                running: AtomicBool::new(false),
                local_port: AtomicU16::new(0),
                shutdown_tx,
                accept_handle: StdMutex::new(None),
            }),
        }
    }

    /// This node's id, used as the sender of outbound messages.
    pub fn local_id(&self) -> PeerId {
        self.inner.local_id
    }

    /// The bound TCP port, once started. Useful when binding port 0.
    pub fn local_port(&self) -> u16 {
        self.inner.local_port.load(Ordering::SeqCst)
    }

    /// Bind the listener on `0.0.0.0:port` and start accepting.
    ///
    /// Fails with [`NetError::Bind`] when the port is unavailable.
    pub async fn start(&self, port: u16) -> Result<(), NetError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            warn!("network manager already running");
            return Ok(());
        }

        let listener = match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(l) => l,
            Err(e) => {
                self.inner.running.store(false, Ordering::SeqCst);
                return Err(NetError::Bind(e));
            }
        };
        let bound_port = match listener.local_addr() {
            Ok(addr) => addr.port(),
            Err(e) => {
                self.inner.running.store(false, Ordering::SeqCst);
                return Err(NetError::Bind(e));
            }
        };
        self.inner.local_port.store(bound_port, Ordering::SeqCst);

        info!(port = bound_port, "network manager listening");

        let inner = self.inner.clone();
        let shutdown_rx = self.inner.shutdown_tx.subscribe();
        let handle = tokio::spawn(accept_loop(inner, listener, shutdown_rx));
        *lock(&self.inner.accept_handle) = Some(handle);

        Ok(())
    }

    /// Close the listener and every session, then join the accept loop.
    /// Idempotent.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.inner.shutdown_tx.send(true);

        let sessions: Vec<Arc<Session>> = {
            let mut table = lock(&self.inner.sessions);
            table.drain().map(|(_, s)| s).collect()
        };
        for session in sessions {
            session.close().await;
            if session.claim_disconnect_report() {
                self.inner
                    .notify_connection(session.peer_id(), ConnectionStatus::Disconnected);
            }
        }

        let handle = lock(&self.inner.accept_handle).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        info!("network manager stopped");
    }

    /// Open an outbound connection.
    ///
    /// On success a random [`PeerId`] is assigned, the session joins the
    /// table, the connection callback fires with Connected, and a
    /// `ConnectionNotification` is sent to the remote. On failure the error
    /// callback fires.
    pub async fn connect(&self, address: &str, port: u16) -> Result<PeerId, NetError> {
        if !self.inner.running.load(Ordering::SeqCst) {
            return Err(NetError::NotRunning);
        }

        let stream = match TcpStream::connect((address, port)).await {
            Ok(s) => s,
            Err(e) => {
                self.inner
                    .notify_error(format!("failed to connect to {address}:{port}: {e}"));
                return Err(NetError::Connect(e));
            }
        };
        info!(%address, port, "connected to peer");

        Inner::register_session(&self.inner, stream).map_err(NetError::Connect)
    }

    /// Close and remove the session, reporting Disconnected. No-op when
    /// the peer is unknown.
    pub async fn disconnect(&self, peer_id: PeerId) {
        let session = lock(&self.inner.sessions).remove(&peer_id);
        if let Some(session) = session {
            session.close().await;
            if session.claim_disconnect_report() {
                self.inner
                    .notify_connection(peer_id, ConnectionStatus::Disconnected);
            }
            info!(peer = %peer_id, "disconnected from peer");
        }
    }

    /// Send a message to one peer.
    ///
    /// Returns `false` when no session exists for the peer, the session is
    /// not connected, or the write fails (which also tears the session
    /// down).
    pub async fn send(&self, peer_id: PeerId, message: Message) -> bool {
        let session = match lock(&self.inner.sessions).get(&peer_id) {
            Some(s) if s.is_connected() => s.clone(),
            _ => return false,
        };

        match session.send(&message).await {
            Ok(()) => true,
            Err(e) => {
                debug!(peer = %peer_id, error = %e, "send failed");
                Inner::teardown_session(&self.inner, &session).await;
                false
            }
        }
    }

    /// Send a message to every connected peer.
    ///
    /// The connected set is snapshotted before sending, so sends happen
    /// outside the table lock. Individual failures are logged and do not
    /// fail the broadcast.
    pub async fn broadcast(&self, message: Message) {
        let sessions: Vec<Arc<Session>> = lock(&self.inner.sessions)
            .values()
            .filter(|s| s.is_connected())
            .cloned()
            .collect();

        for session in sessions {
            if let Err(e) = session.send(&message).await {
                warn!(peer = %session.peer_id(), error = %e, "broadcast send failed");
                Inner::teardown_session(&self.inner, &session).await;
            }
        }
    }

    /// Snapshot of the connected peers.
    pub fn connected_peers(&self) -> Vec<PeerInfo> {
        lock(&self.inner.sessions)
            .values()
            .filter(|s| s.is_connected())
            .map(|s| s.peer_info())
            .collect()
    }

    /// Whether a connected session exists for `peer_id`.
    pub fn is_connected(&self, peer_id: PeerId) -> bool {
        lock(&self.inner.sessions)
            .get(&peer_id)
            .is_some_and(|s| s.is_connected())
    }

    /// Register the inbound-message callback. Single slot; the last
    /// registration wins.
    pub fn set_message_callback<F>(&self, callback: F)
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        *write(&self.inner.message_cb) = Some(Arc::new(callback));
    }

    /// Register the connection-status callback. Single slot.
    pub fn set_connection_callback<F>(&self, callback: F)
    where
        F: Fn(PeerId, ConnectionStatus) + Send + Sync + 'static,
    {
        *write(&self.inner.connection_cb) = Some(Arc::new(callback));
    }

    /// Register the error callback. Single slot.
    pub fn set_error_callback<F>(&self, callback: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        *write(&self.inner.error_cb) = Some(Arc::new(callback));
    }
}

impl Default for NetworkManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    /// Wrap an accepted or connected stream in a session, start its read
    /// loop, announce it, and report Connected.
    fn register_session(inner: &Arc<Inner>, stream: TcpStream) -> std::io::Result<PeerId> {
        let peer_id = PeerId::random();
        let (session, read_half, shutdown_rx) = Session::new(stream, peer_id)?;

        lock(&inner.sessions).insert(peer_id, session.clone());

        tokio::spawn(run_session(
            inner.clone(),
            session.clone(),
            read_half,
            shutdown_rx,
        ));

        // Tell the remote we consider the link up.
        let notification = Message::new(
            inner.local_id,
            Payload::ConnectionNotification {
                status: ConnectionStatus::Connected,
            },
        );
        let announce_session = session.clone();
        tokio::spawn(async move {
            if let Err(e) = announce_session.send(&notification).await {
                debug!(peer = %peer_id, error = %e, "failed to send connection notification");
            }
        });

        inner.notify_connection(peer_id, ConnectionStatus::Connected);
        Ok(peer_id)
    }

    /// Close a session, drop it from the table, and report Disconnected
    /// once.
    async fn teardown_session(inner: &Arc<Inner>, session: &Arc<Session>) {
        session.close().await;
        lock(&inner.sessions).remove(&session.peer_id());
        if session.claim_disconnect_report() {
            inner.notify_connection(session.peer_id(), ConnectionStatus::Disconnected);
        }
    }

    fn notify_message(&self, message: Message) {
        let callback = read(&self.message_cb).clone();
        match callback {
            Some(cb) => cb(message),
            None => debug!("no message callback registered; dropping inbound message"),
        }
    }

    fn notify_connection(&self, peer_id: PeerId, status: ConnectionStatus) {
        let callback = read(&self.connection_cb).clone();
        if let Some(cb) = callback {
            cb(peer_id, status);
        }
    }

    fn notify_error(&self, text: String) {
        warn!("{text}");
        let callback = read(&self.error_cb).clone();
        if let Some(cb) = callback {
            cb(text);
        }
    }
}

async fn accept_loop(
    inner: Arc<Inner>,
    listener: TcpListener,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!(%addr, "accepted connection");
                    if let Err(e) = Inner::register_session(&inner, stream) {
                        inner.notify_error(format!("failed to register session from {addr}: {e}"));
                    }
                }
                Err(e) => {
                    if inner.running.load(Ordering::SeqCst) {
                        warn!(error = %e, "accept failed");
                    } else {
                        break;
                    }
                }
            }
        }
    }
    debug!("accept loop exited");
}

/// Per-session read loop: read a frame, parse it, attribute it to this
/// session, and dispatch. Any I/O or parse error ends the loop and tears
/// the session down.
async fn run_session(
    inner: Arc<Inner>,
    session: Arc<Session>,
    mut read_half: OwnedReadHalf,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let body = tokio::select! {
            _ = shutdown_rx.changed() => break,
            result = read_frame(&mut read_half) => match result {
                Ok(body) => body,
                Err(Error::Protocol(e)) => {
                    inner.notify_error(format!(
                        "protocol violation from {}: {e}", session.peer_id()
                    ));
                    break;
                }
                Err(e) => {
                    debug!(peer = %session.peer_id(), error = %e, "read loop ended");
                    break;
                }
            }
        };

        let mut message = match Message::from_bytes(&body) {
            Ok(m) => m,
            Err(e) => {
                inner.notify_error(format!(
                    "malformed message from {}: {e}", session.peer_id()
                ));
                break;
            }
        };

        // Attribute to the delivering session; peer-supplied sender ids are
        // not routable through the local table.
        message.sender = session.peer_id();

        if message.payload == Payload::Ping {
            let pong = Message::new(inner.local_id, Payload::Pong);
            if let Err(e) = session.send(&pong).await {
                debug!(peer = %session.peer_id(), error = %e, "failed to answer ping");
                break;
            }
        }

        inner.notify_message(message);
    }

    Inner::teardown_session(&inner, &session).await;
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn read<T>(lock: &StdRwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &StdRwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
