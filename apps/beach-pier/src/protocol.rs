use std::fmt;

use thiserror::Error;

/// Signaling message kinds understood by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    State,
    Offer,
    Answer,
    Ice,
}

impl MessageType {
    pub const ALL: [MessageType; 4] = [
        MessageType::State,
        MessageType::Offer,
        MessageType::Answer,
        MessageType::Ice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::State => "STATE",
            MessageType::Offer => "OFFER",
            MessageType::Answer => "ANSWER",
            MessageType::Ice => "ICE",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(token))
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded wire message. The payload borrows from the inbound text and is
/// never re-escaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalingMessage<'a> {
    pub kind: MessageType,
    pub payload: &'a str,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("unrecognized message type in {preview:?}")]
    UnrecognizedMessage { preview: String },
}

const PREVIEW_CHARS: usize = 32;

/// Parse `"<TYPE> <payload>"`. The type token is case-insensitive; everything
/// after the first space belongs to the payload, spaces included.
pub fn decode(text: &str) -> Result<SignalingMessage<'_>, CodecError> {
    let (token, payload) = text.split_once(' ').unwrap_or((text, ""));
    match MessageType::from_token(token) {
        Some(kind) => Ok(SignalingMessage { kind, payload }),
        None => Err(CodecError::UnrecognizedMessage {
            preview: text.chars().take(PREVIEW_CHARS).collect(),
        }),
    }
}

pub fn encode(kind: MessageType, payload: &str) -> String {
    let mut text = String::with_capacity(kind.as_str().len() + 1 + payload.len());
    text.push_str(kind.as_str());
    text.push(' ');
    text.push_str(payload);
    text
}
