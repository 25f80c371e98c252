//! LAN peer discovery over UDP multicast.
//!
//! Every node multicasts `LINKNET_DISCOVERY:<tcp port>` to
//! `239.255.0.1:30001` on a 5-second cadence and listens on the same
//! group. Freshly seen `ip:port` endpoints are reported once through the
//! discovered callback; endpoints that stay silent for 30 seconds are
//! evicted on the next announce tick.
//!
//! Discovery is best-effort: if the sockets cannot be created the caller
//! logs the error and the node keeps working with explicit connects.

use crate::error::DiscoveryError;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Multicast group for discovery datagrams.
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 0, 1);

/// UDP port for discovery datagrams.
pub const DISCOVERY_PORT: u16 = 30001;

const ANNOUNCE_PREFIX: &str = "LINKNET_DISCOVERY";
const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(5);
const PEER_TIMEOUT: Duration = Duration::from_secs(30);

/// Callback invoked once per freshly discovered `(ip, port)` endpoint.
pub type DiscoveredCallback = Arc<dyn Fn(IpAddr, u16) + Send + Sync>;

/// UDP multicast announce/listen loops plus the discovered-peer table.
#[derive(Clone)]
pub struct PeerDiscovery {
    inner: Arc<DiscoveryInner>,
}

struct DiscoveryInner {
    running: AtomicBool,
    local_port: AtomicU16,
    peers: StdMutex<HashMap<String, Instant>>,
    discovered_cb: StdRwLock<Option<DiscoveredCallback>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl PeerDiscovery {
    /// Create a discovery instance. Call [`start`](Self::start) to begin.
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(DiscoveryInner {
                running: AtomicBool::new(false),
                local_port: AtomicU16::new(0),
                peers: StdMutex::new(HashMap::new()),
                discovered_cb: StdRwLock::new(None),
                shutdown_tx,
                tasks: StdMutex::new(Vec::new()),
            }),
        }
    }

    /// Start the announce and listen loops, advertising `tcp_port`.
    ///
    /// Fails when a socket cannot be created, bound, or joined to the
    /// multicast group.
    pub fn start(&self, tcp_port: u16) -> Result<(), DiscoveryError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            warn!("peer discovery already running");
            return Ok(());
        }

        let result = self.start_sockets(tcp_port);
        if result.is_err() {
            self.inner.running.store(false, Ordering::SeqCst);
        }
        result
    }

    fn start_sockets(&self, tcp_port: u16) -> Result<(), DiscoveryError> {
        self.inner.local_port.store(tcp_port, Ordering::SeqCst);

        // Announce socket: any ephemeral port, multicast TTL 1 so the
        // datagrams stay on the local segment.
        let announce_std = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        announce_std.set_multicast_ttl_v4(1)?;
        announce_std.set_nonblocking(true)?;
        let announce_socket = UdpSocket::from_std(announce_std)?;

        // Listen socket: the shared discovery port needs SO_REUSEADDR set
        // before bind so several nodes on one host can all listen.
        let listen_raw = socket2::Socket::new(
            socket2::Domain::IPV4,
            socket2::Type::DGRAM,
            Some(socket2::Protocol::UDP),
        )?;
        listen_raw.set_reuse_address(true)?;
        let bind_addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, DISCOVERY_PORT).into();
        listen_raw.bind(&bind_addr.into())?;
        listen_raw.set_nonblocking(true)?;
        let listen_std: std::net::UdpSocket = listen_raw.into();
        listen_std.join_multicast_v4(&MULTICAST_GROUP, &Ipv4Addr::UNSPECIFIED)?;
        let listen_socket = UdpSocket::from_std(listen_std)?;

        let announce_task = tokio::spawn(announce_loop(
            self.inner.clone(),
            announce_socket,
            tcp_port,
            self.inner.shutdown_tx.subscribe(),
        ));
        let listen_task = tokio::spawn(listen_loop(
            self.inner.clone(),
            listen_socket,
            self.inner.shutdown_tx.subscribe(),
        ));
        {
            let mut tasks = lock(&self.inner.tasks);
            tasks.push(announce_task);
            tasks.push(listen_task);
        }

        info!(port = tcp_port, "peer discovery started");
        Ok(())
    }

    /// Stop both loops and drop the sockets. Idempotent.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.inner.shutdown_tx.send(true);

        let tasks: Vec<JoinHandle<()>> = lock(&self.inner.tasks).drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        info!("peer discovery stopped");
    }

    /// Whether discovery is running.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Register the discovered-endpoint callback. Single slot; last wins.
    pub fn set_discovered_callback<F>(&self, callback: F)
    where
        F: Fn(IpAddr, u16) + Send + Sync + 'static,
    {
        *write(&self.inner.discovered_cb) = Some(Arc::new(callback));
    }

    /// Snapshot of the currently known `"ip:port"` endpoints.
    pub fn discovered_peers(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.inner.peers).keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Default for PeerDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryInner {
    /// Process one received datagram.
    fn handle_datagram(&self, data: &[u8], from: SocketAddr) {
        let Ok(text) = std::str::from_utf8(data) else {
            return;
        };
        let Some(port) = parse_announce(text) else {
            return;
        };

        // An announce advertising our own port is our own multicast echo
        // (or another instance racing us for the same port; either way
        // connecting would be wrong).
        if port == self.local_port.load(Ordering::SeqCst) {
            debug!(%from, port, "skipping own announce");
            return;
        }

        let key = format!("{}:{}", from.ip(), port);
        let is_new = {
            let mut peers = lock(&self.peers);
            peers.insert(key.clone(), Instant::now()).is_none()
        };

        if is_new {
            info!(endpoint = %key, "discovered peer");
            let callback = read(&self.discovered_cb).clone();
            if let Some(cb) = callback {
                cb(from.ip(), port);
            }
        }
    }

    /// Drop endpoints that have not announced within the timeout window.
    fn evict_stale(&self) {
        let mut peers = lock(&self.peers);
        let before = peers.len();
        peers.retain(|_, last_seen| last_seen.elapsed() < PEER_TIMEOUT);
        let evicted = before - peers.len();
        if evicted > 0 {
            debug!(evicted, "evicted stale discovered peers");
        }
    }
}

async fn announce_loop(
    inner: Arc<DiscoveryInner>,
    socket: UdpSocket,
    tcp_port: u16,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let dest = SocketAddr::from((MULTICAST_GROUP, DISCOVERY_PORT));
    let payload = format!("{ANNOUNCE_PREFIX}:{tcp_port}");
    let mut ticker = tokio::time::interval(ANNOUNCE_INTERVAL);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = ticker.tick() => {
                if let Err(e) = socket.send_to(payload.as_bytes(), dest).await {
                    debug!(error = %e, "failed to send announce");
                }
                inner.evict_stale();
            }
        }
    }
    debug!("announce loop exited");
}

async fn listen_loop(
    inner: Arc<DiscoveryInner>,
    socket: UdpSocket,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut buf = [0u8; 256];
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, from)) => inner.handle_datagram(&buf[..len], from),
                Err(e) => {
                    if inner.running.load(Ordering::SeqCst) {
                        warn!(error = %e, "discovery receive failed");
                    } else {
                        break;
                    }
                }
            }
        }
    }
    debug!("listen loop exited");
}

/// Extract the advertised TCP port from an announce payload.
fn parse_announce(text: &str) -> Option<u16> {
    let rest = text.strip_prefix(ANNOUNCE_PREFIX)?;
    let port_str = rest.strip_prefix(':')?;
    port_str.trim().parse::<u16>().ok()
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
