//! Chat dispatch and in-memory history.
//!
//! The dispatcher owns the network manager's single message-callback slot
//! on behalf of every subsystem: it consumes chat messages and forwards
//! everything else to the next handler in the chain (typically the
//! file-transfer engine). History is in-memory only and bounded per peer.

use crate::net::NetworkManager;
use crate::protocol::{Message, Payload};
use crate::types::PeerId;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use tracing::debug;

/// Upper bound on retained entries per peer; the oldest entry is dropped
/// on overflow.
pub const HISTORY_CAP: usize = 10_000;

/// Display name recorded for inbound messages. Peers exchange no profile
/// information, so the sender's name is unknown.
const UNKNOWN_SENDER: &str = "Unknown";

/// One chat line, as stored in history and delivered to the callback.
#[derive(Debug, Clone)]
pub struct ChatEntry {
    /// Sender's peer id (the local session id for inbound messages).
    pub sender_id: PeerId,
    /// Sender's display name.
    pub sender_name: String,
    /// Message text.
    pub content: String,
    /// Unix seconds.
    pub timestamp: u64,
}

/// Callback invoked for every inbound chat message.
pub type ChatCallback = Arc<dyn Fn(ChatEntry) + Send + Sync>;

/// Handler type for the non-chat remainder of the message chain.
pub type NextHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Sends chat messages, keeps bounded per-peer history, and chains
/// unhandled message kinds to a next handler.
#[derive(Clone)]
pub struct ChatDispatcher {
    inner: Arc<ChatInner>,
}

struct ChatInner {
    network: NetworkManager,
    local_name: StdMutex<String>,
    history: StdMutex<HashMap<PeerId, VecDeque<ChatEntry>>>,
    chat_cb: StdRwLock<Option<ChatCallback>>,
    next_handler: StdRwLock<Option<NextHandler>>,
}

impl ChatDispatcher {
    /// Create a dispatcher. Wire [`handler`](Self::handler) into the
    /// network manager's message slot.
    pub fn new(network: NetworkManager) -> Self {
        let local_name = format!("User-{}", network.local_id().short_hex());
        Self {
            inner: Arc::new(ChatInner {
                network,
                local_name: StdMutex::new(local_name),
                history: StdMutex::new(HashMap::new()),
                chat_cb: StdRwLock::new(None),
                next_handler: StdRwLock::new(None),
            }),
        }
    }

    /// This node's id (the sender of outbound chat).
    pub fn local_id(&self) -> PeerId {
        self.inner.network.local_id()
    }

    /// Set the local display name used in history entries.
    pub fn set_local_name(&self, name: impl Into<String>) {
        *lock(&self.inner.local_name) = name.into();
    }

    /// Send a chat message to one peer.
    ///
    /// On success the entry is appended to that peer's history. Returns
    /// `false` when the network manager could not deliver.
    pub async fn send(&self, peer: PeerId, text: impl Into<String>) -> bool {
        let content = text.into();
        let message = Message::new(
            self.local_id(),
            Payload::Chat {
                content: content.clone(),
            },
        );
        let timestamp = message.timestamp;

        if !self.inner.network.send(peer, message).await {
            return false;
        }

        self.inner.append_entry(
            peer,
            ChatEntry {
                sender_id: self.local_id(),
                sender_name: lock(&self.inner.local_name).clone(),
                content,
                timestamp,
            },
        );
        true
    }

    /// Broadcast a chat message to all connected peers, recording it in
    /// each of their histories.
    pub async fn broadcast(&self, text: impl Into<String>) {
        let content = text.into();
        let message = Message::new(
            self.local_id(),
            Payload::Chat {
                content: content.clone(),
            },
        );
        let timestamp = message.timestamp;

        self.inner.network.broadcast(message).await;

        let entry = ChatEntry {
            sender_id: self.local_id(),
            sender_name: lock(&self.inner.local_name).clone(),
            content,
            timestamp,
        };
        for peer in self.inner.network.connected_peers() {
            self.inner.append_entry(peer.id, entry.clone());
        }
    }

    /// The most recent `max` entries for one peer, oldest first.
    pub fn history(&self, peer: PeerId, max: usize) -> Vec<ChatEntry> {
        let history = lock(&self.inner.history);
        match history.get(&peer) {
            Some(entries) => {
                let skip = entries.len().saturating_sub(max);
                entries.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// A global timeline: all peers' entries sorted by timestamp ascending,
    /// truncated to the most recent `max`.
    pub fn all_history(&self, max: usize) -> Vec<ChatEntry> {
        let mut all: Vec<ChatEntry> = {
            let history = lock(&self.inner.history);
            history.values().flatten().cloned().collect()
        };
        all.sort_by_key(|entry| entry.timestamp);

        let skip = all.len().saturating_sub(max);
        all.drain(..skip);
        all
    }

    /// Register the inbound-chat callback. Single slot; last wins.
    pub fn set_chat_callback<F>(&self, callback: F)
    where
        F: Fn(ChatEntry) + Send + Sync + 'static,
    {
        *write(&self.inner.chat_cb) = Some(Arc::new(callback));
    }

    /// Register the handler that receives every non-chat message.
    pub fn set_next_handler<F>(&self, handler: F)
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        *write(&self.inner.next_handler) = Some(Arc::new(handler));
    }

    /// A handler for the network manager's message slot.
    pub fn handler(&self) -> impl Fn(Message) + Send + Sync + 'static {
        let inner = self.inner.clone();
        move |message: Message| inner.handle_message(message)
    }
}

impl ChatInner {
    fn handle_message(&self, message: Message) {
        let Payload::Chat { content } = message.payload else {
            let next = read(&self.next_handler).clone();
            match next {
                Some(handler) => handler(message),
                None => debug!(kind = ?message.kind(), "no next handler; dropping message"),
            }
            return;
        };

        let entry = ChatEntry {
            sender_id: message.sender,
            sender_name: UNKNOWN_SENDER.to_string(),
            content,
            timestamp: message.timestamp,
        };
        self.append_entry(message.sender, entry.clone());

        let callback = read(&self.chat_cb).clone();
        if let Some(cb) = callback {
            cb(entry);
        }
    }

    fn append_entry(&self, peer: PeerId, entry: ChatEntry) {
        let mut history = lock(&self.history);
        let entries = history.entry(peer).or_default();
        if entries.len() == HISTORY_CAP {
            entries.pop_front();
        }
        entries.push_back(entry);
    }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn inbound_chat(sender: PeerId, content: &str, timestamp: u64) -> Message {
        Message {
            sender,
            id: MessageId::random(),
            timestamp,
            payload: Payload::Chat {
                content: content.into(),
            },
        }
    }

    #[tokio::test]
    async fn test_inbound_chat_recorded_and_reported() {
        let dispatcher = ChatDispatcher::new(NetworkManager::new());
        let seen = Arc::new(AtomicUsize::new(0));

        let seen_cb = seen.clone();
        dispatcher.set_chat_callback(move |entry| {
            assert_eq!(entry.content, "hi");
            assert_eq!(entry.sender_name, "Unknown");
            seen_cb.fetch_add(1, Ordering::SeqCst);
        });

        let peer = PeerId::random();
        let handler = dispatcher.handler();
        handler(inbound_chat(peer, "hi", 100));

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        let history = dispatcher.history(peer, 10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "hi");
    }

    #[tokio::test]
    async fn test_non_chat_forwarded_to_next() {
        let dispatcher = ChatDispatcher::new(NetworkManager::new());
        let forwarded = Arc::new(AtomicUsize::new(0));

        let forwarded_cb = forwarded.clone();
        dispatcher.set_next_handler(move |message| {
            assert_eq!(message.payload, Payload::Ping);
            forwarded_cb.fetch_add(1, Ordering::SeqCst);
        });

        let handler = dispatcher.handler();
        handler(Message::new(PeerId::random(), Payload::Ping));

        assert_eq!(forwarded.load(Ordering::SeqCst), 1);
        assert!(dispatcher.all_history(10).is_empty());
    }

    #[tokio::test]
    async fn test_history_truncation_keeps_most_recent() {
        let dispatcher = ChatDispatcher::new(NetworkManager::new());
        let peer = PeerId::random();
        let handler = dispatcher.handler();

        for i in 0..5 {
            handler(inbound_chat(peer, &format!("m{i}"), i));
        }

        let recent = dispatcher.history(peer, 2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "m3");
        assert_eq!(recent[1].content, "m4");
    }

    #[tokio::test]
    async fn test_all_history_sorted_by_timestamp() {
        let dispatcher = ChatDispatcher::new(NetworkManager::new());
        let handler = dispatcher.handler();

        let alice = PeerId::random();
        let bob = PeerId::random();
        handler(inbound_chat(alice, "late", 300));
        handler(inbound_chat(bob, "early", 100));
        handler(inbound_chat(alice, "middle", 200));

        let timeline = dispatcher.all_history(10);
        let contents: Vec<_> = timeline.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, ["early", "middle", "late"]);

        let truncated = dispatcher.all_history(2);
        let contents: Vec<_> = truncated.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, ["middle", "late"]);
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let dispatcher = ChatDispatcher::new(NetworkManager::new());
        let peer = PeerId::random();
        let handler = dispatcher.handler();

        for i in 0..(HISTORY_CAP + 10) {
            handler(inbound_chat(peer, &format!("m{i}"), i as u64));
        }

        let history = dispatcher.history(peer, HISTORY_CAP + 10);
        assert_eq!(history.len(), HISTORY_CAP);
        assert_eq!(history[0].content, "m10");
    }

    #[tokio::test]
    async fn test_send_without_session_is_false() {
        let dispatcher = ChatDispatcher::new(NetworkManager::new());
        let peer = PeerId::random();
        assert!(!dispatcher.send(peer, "nobody home").await);
        assert!(dispatcher.history(peer, 10).is_empty());
    }
}
