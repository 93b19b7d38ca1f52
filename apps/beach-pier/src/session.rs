use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Lifecycle of the single two-party session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SessionPhase {
    /// Fewer than two peers are connected.
    #[default]
    Impossible,
    /// Both peers are present and nobody has offered yet.
    Ready,
    /// An offer has been relayed; waiting for the answer.
    Creating,
    /// Offer and answer have both been relayed.
    Active,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Impossible => "Impossible",
            SessionPhase::Ready => "Ready",
            SessionPhase::Creating => "Creating",
            SessionPhase::Active => "Active",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signaling events that drive a guarded transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    Offer,
    Answer,
}

impl fmt::Display for SignalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalEvent::Offer => f.write_str("offer"),
            SignalEvent::Answer => f.write_str("answer"),
        }
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("{event} requires session state {expected}, but it is {actual}")]
pub struct ProtocolViolation {
    pub event: SignalEvent,
    pub expected: SessionPhase,
    pub actual: SessionPhase,
}

impl ProtocolViolation {
    pub fn metric_label(&self) -> &'static str {
        match self.event {
            SignalEvent::Offer => "offer_out_of_order",
            SignalEvent::Answer => "answer_out_of_order",
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionStateMachine {
    phase: SessionPhase,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Second peer arrived.
    pub fn join(&mut self) {
        self.phase = SessionPhase::Ready;
    }

    pub fn offer(&mut self) -> Result<SessionPhase, ProtocolViolation> {
        self.advance(SignalEvent::Offer, SessionPhase::Ready, SessionPhase::Creating)
    }

    pub fn answer(&mut self) -> Result<SessionPhase, ProtocolViolation> {
        self.advance(
            SignalEvent::Answer,
            SessionPhase::Creating,
            SessionPhase::Active,
        )
    }

    /// Peer count dropped below two. Valid from any phase.
    pub fn leave(&mut self) {
        self.phase = SessionPhase::Impossible;
    }

    fn advance(
        &mut self,
        event: SignalEvent,
        expected: SessionPhase,
        next: SessionPhase,
    ) -> Result<SessionPhase, ProtocolViolation> {
        if self.phase != expected {
            return Err(ProtocolViolation {
                event,
                expected,
                actual: self.phase,
            });
        }
        self.phase = next;
        Ok(next)
    }
}
