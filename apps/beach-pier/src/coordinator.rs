use std::sync::Arc;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::protocol::{self, MessageType};
use crate::registry::{Admission, ConnectionId, PeerHandle, PeerRegistry, MAX_PEERS};
use crate::session::{ProtocolViolation, SessionPhase, SessionStateMachine};

/// Result of a connection asking to join the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Registered { peers: usize, phase: SessionPhase },
    /// Session already has two peers; the connection was sent a close signal.
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Current state was sent back to the requester.
    StateReported,
    Relayed { kind: MessageType },
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Unrecognized,
    /// Sender is not a registered peer.
    UnknownPeer,
    /// No counterpart is connected to relay to.
    NoRelayTarget,
}

impl DropReason {
    fn metric_label(&self) -> &'static str {
        match self {
            DropReason::Unrecognized => "unrecognized",
            DropReason::UnknownPeer => "unknown_peer",
            DropReason::NoRelayTarget => "no_relay_target",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionPhase,
    pub peers: usize,
}

/// Owns the peer registry and session state of the relay.
///
/// Every mutation, and the broadcast that follows it, happens under one lock.
/// Sends only enqueue onto per-connection channels, so the lock is never held
/// across network I/O.
#[derive(Clone, Default)]
pub struct SignalingCoordinator {
    inner: Arc<Mutex<CoordinatorInner>>,
}

#[derive(Default)]
struct CoordinatorInner {
    registry: PeerRegistry,
    machine: SessionStateMachine,
}

impl SignalingCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect(&self, handle: PeerHandle) -> JoinOutcome {
        let id = handle.connection_id();
        let mut inner = self.inner.lock();

        let peers = match inner.registry.try_add(handle.clone()) {
            Admission::Accepted { peers } => peers,
            Admission::Rejected => {
                handle.close();
                counter!("beach_pier_joins_rejected_total").increment(1);
                info!(connection_id = %id, "session full; rejecting peer");
                return JoinOutcome::Rejected;
            }
        };

        handle.send_text(format!("Added as a client: {id}"));
        if peers == MAX_PEERS {
            inner.machine.join();
        }
        inner.broadcast_state();

        gauge!("beach_pier_peers_connected").set(peers as f64);
        counter!("beach_pier_joins_total").increment(1);
        let phase = inner.machine.phase();
        info!(connection_id = %id, peers, state = %phase, "peer joined session");

        JoinOutcome::Registered { peers, phase }
    }

    /// Dispatch one inbound text frame.
    ///
    /// Out-of-order offers and answers leave the session untouched and come
    /// back as [`ProtocolViolation`] for the caller to log.
    pub fn on_message(
        &self,
        id: ConnectionId,
        text: &str,
    ) -> Result<MessageOutcome, ProtocolViolation> {
        let message = match protocol::decode(text) {
            Ok(message) => message,
            Err(err) => {
                debug!(connection_id = %id, error = %err, "ignoring message");
                return Ok(record_drop(DropReason::Unrecognized));
            }
        };

        let mut inner = self.inner.lock();
        if !inner.registry.contains(id) {
            debug!(connection_id = %id, kind = %message.kind, "message from unregistered peer");
            return Ok(record_drop(DropReason::UnknownPeer));
        }

        let outcome = match message.kind {
            MessageType::State => {
                let reply = protocol::encode(MessageType::State, inner.machine.phase().as_str());
                if let Some(peer) = inner.registry.get(id) {
                    peer.send_text(reply);
                }
                MessageOutcome::StateReported
            }
            MessageType::Offer => {
                inner.machine.offer().map_err(record_violation)?;
                debug!(connection_id = %id, "handling offer");
                inner.broadcast_state();
                inner.relay(id, message.kind, text)
            }
            MessageType::Answer => {
                inner.machine.answer().map_err(record_violation)?;
                debug!(connection_id = %id, "handling answer");
                let outcome = inner.relay(id, message.kind, text);
                inner.broadcast_state();
                outcome
            }
            MessageType::Ice => {
                debug!(connection_id = %id, "handling ice candidate");
                inner.relay(id, message.kind, text)
            }
        };

        match outcome {
            MessageOutcome::Dropped(reason) => Ok(record_drop(reason)),
            other => Ok(other),
        }
    }

    /// Forget a connection. Any departure of a registered peer resets the
    /// whole session, even when the other peer stays connected.
    ///
    /// Returns whether `id` was a registered peer.
    pub fn on_disconnect(&self, id: ConnectionId) -> bool {
        let mut inner = self.inner.lock();
        if !inner.registry.remove(id) {
            return false;
        }
        inner.machine.leave();
        inner.broadcast_state();

        let peers = inner.registry.count();
        gauge!("beach_pier_peers_connected").set(peers as f64);
        counter!("beach_pier_disconnects_total").increment(1);
        info!(connection_id = %id, peers, "peer left session; state reset");
        true
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock();
        SessionSnapshot {
            state: inner.machine.phase(),
            peers: inner.registry.count(),
        }
    }
}

impl CoordinatorInner {
    fn broadcast_state(&self) {
        let text = protocol::encode(MessageType::State, self.machine.phase().as_str());
        for peer in self.registry.handles() {
            peer.send_text(text.as_str());
        }
    }

    /// Forward the sender's original text untouched.
    fn relay(&self, from: ConnectionId, kind: MessageType, text: &str) -> MessageOutcome {
        match self.registry.other(from) {
            Some(target) => {
                target.send_text(text);
                counter!("beach_pier_messages_relayed_total", "kind" => kind.as_str())
                    .increment(1);
                MessageOutcome::Relayed { kind }
            }
            None => MessageOutcome::Dropped(DropReason::NoRelayTarget),
        }
    }
}

fn record_drop(reason: DropReason) -> MessageOutcome {
    counter!("beach_pier_messages_dropped_total", "reason" => reason.metric_label())
        .increment(1);
    MessageOutcome::Dropped(reason)
}

fn record_violation(err: ProtocolViolation) -> ProtocolViolation {
    counter!("beach_pier_protocol_violations_total", "reason" => err.metric_label())
        .increment(1);
    err
}
