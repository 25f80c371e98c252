//! Chunked file transfer between peers.
//!
//! One engine instance observes all file-related inbound messages and
//! drives one state machine per `(peer, file id)` pair in each direction.
//! The file id is the offered filename (source path basename), so the
//! receiver's completion message always matches the sender's table.
//!
//! Sender: `FileTransferRequest`, then 16 KiB chunks streamed in order,
//! then wait for the receiver's `FileTransferComplete`. There is no
//! explicit response step between request and first chunk; a rejection
//! arrives as a failed completion and stops the stream.
//!
//! Receiver: ask the application, write chunks at `index * 16 KiB`,
//! acknowledge with `FileTransferComplete(success = true)` once the byte
//! count matches the offer.
//!
//! Both tables live behind a single async mutex. Handlers lock, operate,
//! unlock, and only then run user callbacks, so a callback can safely call
//! back into the engine.

use crate::error::FileError;
use crate::net::NetworkManager;
use crate::protocol::{Message, Payload};
use crate::types::PeerId;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Instant;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Fixed chunk size. The final chunk of a file may be shorter.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Default directory for received files, created on demand.
pub const DEFAULT_DOWNLOADS_DIR: &str = "downloads";

/// State of one transfer direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Entry created; the request has not been confirmed sent yet.
    Pending,
    /// Request delivered (sender) or accepted (receiver).
    InProgress,
    /// Sender only: all bytes sent, waiting for the receiver's completion.
    AwaitingAck,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully (error, rejection, or cancel).
    Failed,
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in progress",
            Self::AwaitingAck => "awaiting ack",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Progress callback: `(peer, path, fraction in 0.0..=1.0)`.
pub type ProgressCallback = Arc<dyn Fn(PeerId, &str, f64) + Send + Sync>;

/// Completion callback: `(peer, path, ok, error text)`.
pub type CompletedCallback = Arc<dyn Fn(PeerId, &str, bool, &str) + Send + Sync>;

/// Inbound-offer callback: `(peer, filename, size) -> accept`.
///
/// Invoked synchronously from the receive path; it must be quick. When no
/// callback is registered, offers are accepted.
pub type RequestCallback = Arc<dyn Fn(PeerId, &str, u64) -> bool + Send + Sync>;

struct OutgoingTransfer {
    file_path: PathBuf,
    file_size: u64,
    peer: PeerId,
    status: TransferStatus,
    bytes_sent: u64,
    next_chunk_index: u32,
    #[allow(dead_code)]
    started: Instant,
}

struct IncomingTransfer {
    output_path: PathBuf,
    file_size: u64,
    peer: PeerId,
    status: TransferStatus,
    bytes_written: u64,
    file: Option<File>,
    received_chunks: HashSet<u32>,
    #[allow(dead_code)]
    started: Instant,
}

#[derive(Default)]
struct Tables {
    outgoing: HashMap<(PeerId, String), OutgoingTransfer>,
    incoming: HashMap<(PeerId, String), IncomingTransfer>,
}

/// Snapshot row returned by [`FileTransferEngine::ongoing`].
#[derive(Debug, Clone)]
pub struct TransferSnapshot {
    /// Remote peer.
    pub peer: PeerId,
    /// Local path (source for outgoing, destination for incoming).
    pub path: String,
    /// Current status.
    pub status: TransferStatus,
    /// `bytes done / total`, or 0.0 when the total is 0.
    pub progress: f64,
}

/// The file-transfer engine.
#[derive(Clone)]
pub struct FileTransferEngine {
    inner: Arc<Engine>,
}

struct Engine {
    network: NetworkManager,
    tables: Mutex<Tables>,
    downloads_dir: StdMutex<PathBuf>,
    progress_cb: StdRwLock<Option<ProgressCallback>>,
    completed_cb: StdRwLock<Option<CompletedCallback>>,
    request_cb: StdRwLock<Option<RequestCallback>>,
    inbox_tx: mpsc::UnboundedSender<Message>,
}

impl FileTransferEngine {
    /// Create an engine bound to a network manager and start its inbox
    /// worker. Wire [`handler`](Self::handler) into the message chain.
    pub fn new(network: NetworkManager) -> Self {
        let (inbox_tx, mut inbox_rx) = mpsc::unbounded_channel::<Message>();

        let inner = Arc::new(Engine {
            network,
            tables: Mutex::new(Tables::default()),
            downloads_dir: StdMutex::new(PathBuf::from(DEFAULT_DOWNLOADS_DIR)),
            progress_cb: StdRwLock::new(None),
            completed_cb: StdRwLock::new(None),
            request_cb: StdRwLock::new(None),
            inbox_tx,
        });

        // File messages from one session must be handled in arrival order;
        // a single worker drains the inbox sequentially.
        let worker = inner.clone();
        tokio::spawn(async move {
            while let Some(message) = inbox_rx.recv().await {
                worker.handle_message(message).await;
            }
        });

        Self { inner }
    }

    /// A handler for the inbound message chain. Consumes file-related
    /// kinds; everything else is ignored (this engine sits at the end of
    /// the chain).
    pub fn handler(&self) -> impl Fn(Message) + Send + Sync + 'static {
        let inbox = self.inner.inbox_tx.clone();
        move |message: Message| {
            if matches!(
                message.payload,
                Payload::FileTransferRequest { .. }
                    | Payload::FileChunk { .. }
                    | Payload::FileTransferComplete { .. }
            ) {
                let _ = inbox.send(message);
            }
        }
    }

    /// Override the downloads directory (defaults to `./downloads`).
    pub fn set_downloads_dir(&self, dir: impl Into<PathBuf>) {
        *stdlock(&self.inner.downloads_dir) = dir.into();
    }

    /// Offer a file to a peer and start streaming it.
    ///
    /// Fails with [`FileError::NotFound`] before any I/O when the path does
    /// not name an existing file, and [`FileError::NoPeer`] when there is
    /// no connected session for `peer`. Success means the request has been
    /// sent; progress and completion arrive via callbacks.
    pub async fn send_file(&self, peer: PeerId, path: impl AsRef<Path>) -> Result<(), FileError> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|_| FileError::NotFound(path.to_path_buf()))?;
        if !metadata.is_file() {
            return Err(FileError::NotFound(path.to_path_buf()));
        }

        let file_id = file_id_for(path)
            .ok_or_else(|| FileError::ReadFail(format!("unusable file name: {}", path.display())))?;
        let file_size = metadata.len();

        if !self.inner.network.is_connected(peer) {
            return Err(FileError::NoPeer);
        }

        // The entry goes in before the request leaves: a fast receiver can
        // answer before this task runs again, and the completion handler
        // must find the transfer.
        {
            let mut tables = self.inner.tables.lock().await;
            if tables
                .outgoing
                .insert(
                    (peer, file_id.clone()),
                    OutgoingTransfer {
                        file_path: path.to_path_buf(),
                        file_size,
                        peer,
                        status: TransferStatus::Pending,
                        bytes_sent: 0,
                        next_chunk_index: 0,
                        started: Instant::now(),
                    },
                )
                .is_some()
            {
                warn!(%peer, file_id, "replacing transfer already in flight");
            }
        }

        let request = Message::new(
            self.inner.network.local_id(),
            Payload::FileTransferRequest {
                file_size,
                filename: file_id.clone(),
            },
        );
        if !self.inner.network.send(peer, request).await {
            let mut tables = self.inner.tables.lock().await;
            tables.outgoing.remove(&(peer, file_id));
            return Err(FileError::NoPeer);
        }

        // The request is out; the transfer is live even before the first
        // chunk (a zero-length file never sends one).
        {
            let mut tables = self.inner.tables.lock().await;
            if let Some(transfer) = tables.outgoing.get_mut(&(peer, file_id.clone())) {
                transfer.status = TransferStatus::InProgress;
            }
        }

        info!(%peer, file_id, file_size, "file transfer request sent");

        let engine = self.inner.clone();
        let source = path.to_path_buf();
        tokio::spawn(async move {
            engine.run_sender(peer, file_id, source, file_size).await;
        });

        Ok(())
    }

    /// Cancel a transfer in either direction.
    ///
    /// Moves the entry to Failed, notifies the peer with a failed
    /// completion ("cancelled"), closes any open file handle, and removes
    /// the entry. No-op when nothing matches.
    pub async fn cancel(&self, peer: PeerId, path: impl AsRef<Path>) {
        let Some(file_id) = file_id_for(path.as_ref()) else {
            return;
        };

        let removed = {
            let mut tables = self.inner.tables.lock().await;
            if tables.outgoing.remove(&(peer, file_id.clone())).is_some() {
                true
            } else if let Some(mut transfer) = tables.incoming.remove(&(peer, file_id.clone())) {
                transfer.file.take();
                true
            } else {
                false
            }
        };

        if removed {
            info!(%peer, file_id, "transfer cancelled");
            self.inner
                .send_complete(peer, &file_id, false, "cancelled")
                .await;
        } else {
            debug!(%peer, file_id, "no transfer to cancel");
        }
    }

    /// Snapshot of all ongoing transfers, both directions.
    pub async fn ongoing(&self) -> Vec<TransferSnapshot> {
        let tables = self.inner.tables.lock().await;
        let mut rows = Vec::with_capacity(tables.outgoing.len() + tables.incoming.len());

        for transfer in tables.outgoing.values() {
            rows.push(TransferSnapshot {
                peer: transfer.peer,
                path: transfer.file_path.display().to_string(),
                status: transfer.status,
                progress: fraction(transfer.bytes_sent, transfer.file_size),
            });
        }
        for transfer in tables.incoming.values() {
            rows.push(TransferSnapshot {
                peer: transfer.peer,
                path: transfer.output_path.display().to_string(),
                status: transfer.status,
                progress: fraction(transfer.bytes_written, transfer.file_size),
            });
        }
        rows
    }

    /// Register the progress callback. Single slot; last wins.
    pub fn set_progress_callback<F>(&self, callback: F)
    where
        F: Fn(PeerId, &str, f64) + Send + Sync + 'static,
    {
        *stdwrite(&self.inner.progress_cb) = Some(Arc::new(callback));
    }

    /// Register the completion callback. Single slot; last wins.
    pub fn set_completed_callback<F>(&self, callback: F)
    where
        F: Fn(PeerId, &str, bool, &str) + Send + Sync + 'static,
    {
        *stdwrite(&self.inner.completed_cb) = Some(Arc::new(callback));
    }

    /// Register the inbound-offer callback. Single slot; last wins.
    pub fn set_request_callback<F>(&self, callback: F)
    where
        F: Fn(PeerId, &str, u64) -> bool + Send + Sync + 'static,
    {
        *stdwrite(&self.inner.request_cb) = Some(Arc::new(callback));
    }
}

impl Engine {
    async fn handle_message(&self, message: Message) {
        let peer = message.sender;
        match message.payload {
            Payload::FileTransferRequest {
                file_size,
                filename,
            } => self.handle_request(peer, filename, file_size).await,
            Payload::FileChunk {
                file_id,
                chunk_index,
                data,
            } => self.handle_chunk(peer, file_id, chunk_index, data).await,
            Payload::FileTransferComplete {
                file_id,
                success,
                error,
            } => self.handle_complete(peer, file_id, success, error).await,
            _ => {}
        }
    }

    async fn handle_request(&self, peer: PeerId, filename: String, file_size: u64) {
        info!(%peer, filename, file_size, "file transfer request received");

        // The offered name is used as a path component; strip anything that
        // would escape the downloads directory.
        let Some(safe_name) = Path::new(&filename)
            .file_name()
            .and_then(|n| n.to_str())
            .map(String::from)
        else {
            warn!(%peer, filename, "rejecting offer with unusable filename");
            self.send_complete(peer, &filename, false, "unusable filename")
                .await;
            return;
        };

        let accept = {
            let callback = stdread(&self.request_cb).clone();
            callback.map_or(true, |cb| cb(peer, &safe_name, file_size))
        };
        if !accept {
            info!(%peer, filename = safe_name, "file transfer rejected");
            self.send_complete(peer, &filename, false, "transfer rejected by receiver")
                .await;
            return;
        }

        let dir = stdlock(&self.downloads_dir).clone();
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            warn!(error = %e, "failed to create downloads directory");
            self.send_complete(peer, &filename, false, "failed to create downloads directory")
                .await;
            return;
        }

        let output_path = dir.join(&safe_name);
        let file = match File::create(&output_path).await {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %output_path.display(), error = %e, "failed to create output file");
                self.send_complete(peer, &filename, false, "failed to create output file")
                    .await;
                return;
            }
        };

        // A zero-length offer has no chunks to wait for; the created file
        // is already complete.
        if file_size == 0 {
            drop(file);
            self.send_complete(peer, &filename, true, "").await;
            let path = output_path.display().to_string();
            self.notify_completed(peer, &path, true, "");
            info!(%peer, filename, "zero-length file transfer completed");
            return;
        }

        {
            let mut tables = self.tables.lock().await;
            if tables
                .incoming
                .insert(
                    (peer, filename.clone()),
                    IncomingTransfer {
                        output_path: output_path.clone(),
                        file_size,
                        peer,
                        status: TransferStatus::InProgress,
                        bytes_written: 0,
                        file: Some(file),
                        received_chunks: HashSet::new(),
                        started: Instant::now(),
                    },
                )
                .is_some()
            {
                warn!(%peer, filename, "replacing incoming transfer already in flight");
            }
        }

        info!(%peer, path = %output_path.display(), "file transfer accepted");
    }

    async fn handle_chunk(
        &self,
        peer: PeerId,
        file_id: String,
        chunk_index: u32,
        data: Vec<u8>,
    ) {
        enum Outcome {
            Ignored,
            Progressed { path: String, progress: f64 },
            Finished { path: String },
            WriteFailed { path: String },
        }

        // The entry is taken out of the table for the duration of the
        // write and re-inserted unless the transfer ended.
        let outcome = {
            let mut tables = self.tables.lock().await;
            let key = (peer, file_id.clone());
            let Some(mut transfer) = tables.incoming.remove(&key) else {
                debug!(%peer, file_id, "chunk for unknown transfer");
                return;
            };

            if transfer.received_chunks.contains(&chunk_index) {
                warn!(%peer, file_id, chunk_index, "duplicate chunk ignored");
                tables.incoming.insert(key, transfer);
                Outcome::Ignored
            } else {
                let write_result = match transfer.file.as_mut() {
                    Some(file) => async {
                        let offset = u64::from(chunk_index) * CHUNK_SIZE as u64;
                        file.seek(std::io::SeekFrom::Start(offset)).await?;
                        file.write_all(&data).await
                    }
                    .await,
                    None => Err(std::io::Error::other("output file closed")),
                };

                match write_result {
                    Err(e) => {
                        warn!(%peer, file_id, error = %e, "failed to write chunk");
                        Outcome::WriteFailed {
                            path: transfer.output_path.display().to_string(),
                        }
                    }
                    Ok(()) => {
                        transfer.received_chunks.insert(chunk_index);
                        transfer.bytes_written += data.len() as u64;
                        let progress = fraction(transfer.bytes_written, transfer.file_size);
                        let path = transfer.output_path.display().to_string();

                        if transfer.bytes_written >= transfer.file_size {
                            if let Some(mut file) = transfer.file.take() {
                                let _ = file.flush().await;
                            }
                            Outcome::Finished { path }
                        } else {
                            tables.incoming.insert(key, transfer);
                            Outcome::Progressed { path, progress }
                        }
                    }
                }
            }
        };

        match outcome {
            Outcome::Ignored => {}
            Outcome::Progressed { path, progress } => {
                self.notify_progress(peer, &path, progress);
            }
            Outcome::Finished { path } => {
                self.notify_progress(peer, &path, 1.0);
                self.send_complete(peer, &file_id, true, "").await;
                self.notify_completed(peer, &path, true, "");
                info!(%peer, file_id, path, "file transfer completed");
            }
            Outcome::WriteFailed { path } => {
                self.send_complete(peer, &file_id, false, "failed to write to output file")
                    .await;
                self.notify_completed(peer, &path, false, "failed to write to output file");
            }
        }
    }

    async fn handle_complete(
        &self,
        peer: PeerId,
        file_id: String,
        success: bool,
        error: String,
    ) {
        let removed = {
            let mut tables = self.tables.lock().await;
            let key = (peer, file_id.clone());
            if let Some(transfer) = tables.outgoing.remove(&key) {
                Some(transfer.file_path.display().to_string())
            } else if let Some(mut transfer) = tables.incoming.remove(&key) {
                // The sender gave up on us mid-transfer.
                transfer.file.take();
                Some(transfer.output_path.display().to_string())
            } else {
                debug!(%peer, file_id, "completion for unknown transfer");
                None
            }
        };

        if let Some(path) = removed {
            if success {
                info!(%peer, file_id, "transfer confirmed complete by receiver");
            } else {
                warn!(%peer, file_id, error, "transfer failed");
            }
            self.notify_completed(peer, &path, success, &error);
        }
    }

    /// Stream the file to the peer, chunk by chunk, then wait for the ack.
    async fn run_sender(&self, peer: PeerId, file_id: String, path: PathBuf, size: u64) {
        let path_str = path.display().to_string();

        let mut file = match File::open(&path).await {
            Ok(f) => f,
            Err(e) => {
                warn!(%peer, file_id, error = %e, "failed to open file for reading");
                self.fail_outgoing(peer, &file_id, &path_str, "failed to open file for reading")
                    .await;
                return;
            }
        };

        let mut chunk_index: u32 = 0;
        let mut bytes_sent: u64 = 0;

        while bytes_sent < size {
            // A cancel or an inbound failure removes the entry; stop quietly.
            {
                let tables = self.tables.lock().await;
                match tables.outgoing.get(&(peer, file_id.clone())) {
                    Some(t) if t.status != TransferStatus::Failed => {}
                    _ => return,
                }
            }

            let mut chunk = vec![0u8; CHUNK_SIZE];
            let read = match file.read(&mut chunk).await {
                Ok(n) => n,
                Err(e) => {
                    warn!(%peer, file_id, error = %e, "failed to read from file");
                    self.fail_outgoing(peer, &file_id, &path_str, "failed to read from file")
                        .await;
                    return;
                }
            };
            if read == 0 {
                warn!(%peer, file_id, "unexpected end of file");
                self.fail_outgoing(peer, &file_id, &path_str, "unexpected end of file")
                    .await;
                return;
            }
            chunk.truncate(read);

            let message = Message::new(
                self.network.local_id(),
                Payload::FileChunk {
                    file_id: file_id.clone(),
                    chunk_index,
                    data: chunk,
                },
            );
            if !self.network.send(peer, message).await {
                self.fail_outgoing(peer, &file_id, &path_str, "failed to send file chunk")
                    .await;
                return;
            }

            bytes_sent += read as u64;
            chunk_index += 1;

            {
                let mut tables = self.tables.lock().await;
                if let Some(transfer) = tables.outgoing.get_mut(&(peer, file_id.clone())) {
                    transfer.bytes_sent = bytes_sent;
                    transfer.next_chunk_index = chunk_index;
                }
            }
            self.notify_progress(peer, &path_str, fraction(bytes_sent, size));
        }

        // All bytes out; completion now belongs to the receiver's ack.
        let mut tables = self.tables.lock().await;
        if let Some(transfer) = tables.outgoing.get_mut(&(peer, file_id.clone())) {
            transfer.status = TransferStatus::AwaitingAck;
        }
        debug!(%peer, file_id, bytes_sent, "all chunks sent, awaiting ack");
    }

    /// Drop a failed outgoing transfer, tell the peer, and run the
    /// completion callback.
    async fn fail_outgoing(&self, peer: PeerId, file_id: &str, path: &str, reason: &str) {
        {
            let mut tables = self.tables.lock().await;
            tables.outgoing.remove(&(peer, file_id.to_string()));
        }
        self.send_complete(peer, file_id, false, reason).await;
        self.notify_completed(peer, path, false, reason);
    }

    async fn send_complete(&self, peer: PeerId, file_id: &str, success: bool, error: &str) {
        let message = Message::new(
            self.network.local_id(),
            Payload::FileTransferComplete {
                file_id: file_id.to_string(),
                success,
                error: error.to_string(),
            },
        );
        if !self.network.send(peer, message).await {
            debug!(%peer, file_id, "failed to send transfer completion");
        }
    }

    fn notify_progress(&self, peer: PeerId, path: &str, progress: f64) {
        let callback = stdread(&self.progress_cb).clone();
        if let Some(cb) = callback {
            cb(peer, path, progress);
        }
    }

    fn notify_completed(&self, peer: PeerId, path: &str, ok: bool, error: &str) {
        let callback = stdread(&self.completed_cb).clone();
        if let Some(cb) = callback {
            cb(peer, path, ok, error);
        }
    }
}

/// Transfer key for a local path: its UTF-8 basename.
fn file_id_for(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(String::from)
}

fn fraction(done: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        done as f64 / total as f64
    }
}

fn stdlock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn stdread<T>(lock: &StdRwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn stdwrite<T>(lock: &StdRwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
