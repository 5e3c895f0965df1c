//! Chat Hub
//!
//! Holds the live connections and a bounded history of recent messages.
//! Every connection owns the receiving half of an unbounded channel; the hub
//! only ever enqueues frames on the sending half, so a slow peer never blocks
//! delivery to the others.
//!
//! Registration, history replay, append and broadcast all happen under one
//! lock. A joining connection therefore sees each message exactly once:
//! either in its history batch or as a later broadcast.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::ChatConfig;
use crate::protocol::{ClientFrame, Message, ProtocolError, ServerFrame};

/// Receiving side of a live connection
#[derive(Debug)]
pub struct Connection {
    pub id: String,
    pub frames: mpsc::UnboundedReceiver<ServerFrame>,
}

struct HubInner {
    connections: HashMap<String, mpsc::UnboundedSender<ServerFrame>>,
    history: VecDeque<Message>,
}

/// Fans chat messages out to all live connections
pub struct Hub {
    config: ChatConfig,
    inner: Mutex<HubInner>,
}

impl Hub {
    pub fn new(config: ChatConfig) -> Self {
        Self {
            inner: Mutex::new(HubInner {
                connections: HashMap::new(),
                history: VecDeque::with_capacity(config.history_capacity + 1),
            }),
            config,
        }
    }

    /// Register a new connection and queue its history batch.
    pub fn connect(&self) -> Connection {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4().to_string();

        let mut inner = self.inner.lock();
        let skip = inner.history.len().saturating_sub(self.config.replay_count);
        let messages: Vec<Message> = inner.history.iter().skip(skip).cloned().collect();

        let tx = inner.connections.entry(id.clone()).or_insert(tx);
        if tx.send(ServerFrame::History { messages }).is_err() {
            log::warn!("Failed to queue history for connection {}", id);
        }

        log::info!(
            "Connection {} opened. Total connections: {}",
            id,
            inner.connections.len()
        );
        Connection { id, frames: rx }
    }

    /// Deregister a connection. Returns false if it was already gone.
    pub fn disconnect(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.connections.remove(id).is_some();
        if removed {
            log::info!(
                "Connection {} closed. Remaining connections: {}",
                id,
                inner.connections.len()
            );
        }
        removed
    }

    /// Handle an inbound text frame from connection `id`.
    pub fn handle_text(&self, id: &str, text: &str) -> Option<Message> {
        self.handle_parsed(id, ClientFrame::parse(text, self.config.max_frame_bytes))
    }

    /// Handle an inbound binary frame from connection `id`.
    pub fn handle_bytes(&self, id: &str, bytes: &[u8]) -> Option<Message> {
        self.handle_parsed(id, ClientFrame::parse_bytes(bytes, self.config.max_frame_bytes))
    }

    fn handle_parsed(
        &self,
        id: &str,
        frame: Result<ClientFrame, ProtocolError>,
    ) -> Option<Message> {
        match frame {
            Ok(ClientFrame::Chat {
                username,
                content,
                encrypted,
            }) => Some(self.publish(username, content, encrypted)),
            Err(e) => {
                log::warn!("Rejected frame from {}: {}", id, e);
                self.send_to(id, ServerFrame::error(format!("Failed to process message: {}", e)));
                None
            }
        }
    }

    /// Append a message to history and broadcast it to every live connection.
    ///
    /// The timestamp is taken under the hub lock and never runs behind the
    /// newest history entry, so history and broadcast order match timestamp
    /// order even when the wall clock steps backwards.
    pub fn publish(&self, username: String, content: String, encrypted: bool) -> Message {
        let mut inner = self.inner.lock();
        let now = chrono::Utc::now().timestamp_millis();
        let timestamp = inner
            .history
            .back()
            .map_or(now, |last| now.max(last.timestamp));
        let message = Message {
            id: Uuid::new_v4().to_string(),
            username,
            content,
            encrypted,
            timestamp,
        };

        inner.history.push_back(message.clone());
        while inner.history.len() > self.config.history_capacity {
            inner.history.pop_front();
        }

        let frame = ServerFrame::Message {
            message: message.clone(),
        };
        let mut dead = Vec::new();
        for (conn_id, tx) in inner.connections.iter() {
            if tx.send(frame.clone()).is_err() {
                dead.push(conn_id.clone());
            }
        }
        log::debug!(
            "Broadcast message {} to {} connections",
            message.id,
            inner.connections.len() - dead.len()
        );

        for conn_id in dead {
            inner.connections.remove(&conn_id);
            log::warn!("Dropped connection {} after failed send", conn_id);
        }

        message
    }

    /// Snapshot of the history buffer, oldest first
    pub fn history(&self) -> Vec<Message> {
        self.inner.lock().history.iter().cloned().collect()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.lock().connections.len()
    }

    fn send_to(&self, id: &str, frame: ServerFrame) {
        let mut inner = self.inner.lock();
        let failed = match inner.connections.get(id) {
            Some(tx) => tx.send(frame).is_err(),
            None => false,
        };
        if failed {
            inner.connections.remove(id);
            log::warn!("Dropped connection {} after failed send", id);
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(ChatConfig::default())
    }
}
