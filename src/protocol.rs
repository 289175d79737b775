// Relay wire format
// JSON text frames exchanged with the relay over the duplex channel

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{ActionKind, Hangout, HangoutState};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unexpected state {state} in {kind} message")]
    UnexpectedState {
        kind: &'static str,
        state: HangoutState,
    },
}

/// Chat text carried by an action on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireText {
    pub text: String,
    pub timestamp: i64,
}

/// An owner action sent to the relay, addressed to `username`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<WireText>,
    pub command: ActionKind,
    pub timestamp: i64,
    /// Set when replaying an action queued while the channel was down
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offline: Option<bool>,
}

impl OutboundMessage {
    /// Strip bookkeeping fields (`delivered`, `read`, message owner) from a snapshot
    pub fn from_hangout(hangout: &Hangout) -> Self {
        OutboundMessage {
            username: hangout.peer_id.clone(),
            email: hangout.peer_email.clone(),
            message: hangout.message.as_ref().map(|m| WireText {
                text: m.text.clone(),
                timestamp: m.timestamp,
            }),
            command: hangout.state.action(),
            timestamp: hangout.timestamp,
            offline: None,
        }
    }

    pub fn replayed(mut self) -> Self {
        self.offline = Some(true);
        self
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages pushed by the relay, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    /// One of the owner's own actions was delivered
    #[serde(rename = "ACKHOWLEDGEMENT", alias = "ACKNOWLEDGEMENT")]
    Acknowledgement { hangout: Hangout },

    /// A peer performed an action against the owner
    #[serde(rename = "HANGOUT")]
    PeerAction { hangout: Hangout },

    /// Peer actions missed while disconnected
    #[serde(rename = "UNREAD_HANGOUTS")]
    UnreadBatch { hangouts: Vec<Hangout> },

    /// A replayed offline action was delivered
    #[serde(rename = "OFFLINE_ACKN")]
    OfflineAck { hangout: Hangout },
}

impl InboundMessage {
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::Acknowledgement { .. } => "ACKHOWLEDGEMENT",
            InboundMessage::PeerAction { .. } => "HANGOUT",
            InboundMessage::UnreadBatch { .. } => "UNREAD_HANGOUTS",
            InboundMessage::OfflineAck { .. } => "OFFLINE_ACKN",
        }
    }
}
