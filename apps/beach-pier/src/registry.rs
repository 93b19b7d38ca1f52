use std::fmt;

use metrics::counter;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;
use uuid::Uuid;

/// Peers a single session admits.
pub const MAX_PEERS: usize = 2;

/// Identity issued once per accepted transport connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Frames queued for a connection's writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Outbound buffer was full; the frame was discarded.
    Dropped,
    /// Writer task is gone; the connection is on its way out.
    Closed,
}

/// Non-blocking send capability for one connection
#[derive(Debug, Clone)]
pub struct PeerHandle {
    connection_id: ConnectionId,
    sender: mpsc::Sender<Outbound>,
}

impl PeerHandle {
    pub fn new(connection_id: ConnectionId, sender: mpsc::Sender<Outbound>) -> Self {
        Self {
            connection_id,
            sender,
        }
    }

    /// Build a handle together with the receiver its writer task drains.
    pub fn channel(connection_id: ConnectionId, depth: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(depth);
        (Self::new(connection_id, tx), rx)
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn send_text(&self, text: impl Into<String>) -> Delivery {
        self.enqueue(Outbound::Text(text.into()))
    }

    pub fn close(&self) -> Delivery {
        self.enqueue(Outbound::Close)
    }

    fn enqueue(&self, frame: Outbound) -> Delivery {
        match self.sender.try_send(frame) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => {
                counter!("beach_pier_outbound_dropped_total", "reason" => "buffer_full")
                    .increment(1);
                warn!(
                    connection_id = %self.connection_id,
                    "outbound buffer full; dropping frame"
                );
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                counter!("beach_pier_outbound_dropped_total", "reason" => "writer_closed")
                    .increment(1);
                Delivery::Closed
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted { peers: usize },
    Rejected,
}

/// Connected peers of the session, capped at [`MAX_PEERS`].
///
/// The registry does no locking of its own; callers hold it behind the
/// coordinator's lock so that check-and-insert is a single step.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: Vec<PeerHandle>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: Vec::with_capacity(MAX_PEERS),
        }
    }

    pub fn try_add(&mut self, handle: PeerHandle) -> Admission {
        if self.peers.len() >= MAX_PEERS || self.contains(handle.connection_id()) {
            return Admission::Rejected;
        }
        self.peers.push(handle);
        Admission::Accepted {
            peers: self.peers.len(),
        }
    }

    /// Returns whether an entry was removed.
    pub fn remove(&mut self, id: ConnectionId) -> bool {
        let before = self.peers.len();
        self.peers.retain(|peer| peer.connection_id() != id);
        self.peers.len() != before
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.peers.iter().any(|peer| peer.connection_id() == id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&PeerHandle> {
        self.peers.iter().find(|peer| peer.connection_id() == id)
    }

    /// The peer that is not `id`, if one is connected.
    pub fn other(&self, id: ConnectionId) -> Option<&PeerHandle> {
        self.peers.iter().find(|peer| peer.connection_id() != id)
    }

    pub fn count(&self) -> usize {
        self.peers.len()
    }

    pub fn handles(&self) -> impl Iterator<Item = &PeerHandle> {
        self.peers.iter()
    }
}
