//! Real-time Protocol
//!
//! Defines the JSON frames exchanged between clients and the chat hub.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A chat message as stored in history and broadcast to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub username: String,
    /// Plaintext, or an envelope when `encrypted` is set
    pub content: String,
    pub encrypted: bool,
    /// Epoch milliseconds
    pub timestamp: i64,
}

/// Frames sent by clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Chat {
        username: String,
        content: String,
        encrypted: bool,
    },
}

/// Frames sent by the hub
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Recent history, sent once right after a connection opens
    History { messages: Vec<Message> },
    /// A newly accepted chat message
    Message { message: Message },
    /// Sent only to the connection whose frame was rejected
    Error { message: String },
}

/// Reasons an inbound frame is rejected
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Frame too large ({0} bytes)")]
    TooLarge(usize),
    #[error("Frame is not valid UTF-8")]
    NotUtf8,
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

impl ClientFrame {
    /// Parse and validate a text frame.
    pub fn parse(text: &str, max_len: usize) -> Result<Self, ProtocolError> {
        if text.len() > max_len {
            return Err(ProtocolError::TooLarge(text.len()));
        }
        let frame: ClientFrame = serde_json::from_str(text)?;
        frame.validate()?;
        Ok(frame)
    }

    /// Parse a binary frame carrying UTF-8 JSON.
    pub fn parse_bytes(bytes: &[u8], max_len: usize) -> Result<Self, ProtocolError> {
        if bytes.len() > max_len {
            return Err(ProtocolError::TooLarge(bytes.len()));
        }
        let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::NotUtf8)?;
        Self::parse(text, max_len)
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            ClientFrame::Chat { username, .. } if username.trim().is_empty() => {
                Err(ProtocolError::MissingField("username"))
            }
            ClientFrame::Chat { .. } => Ok(()),
        }
    }

    /// Serialize the frame to JSON text
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ServerFrame {
    /// Serialize the frame to JSON text
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize a frame from JSON text
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }
}
