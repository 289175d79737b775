use serde::{Deserialize, Serialize};
use std::fmt;

/// The six relationship actions two users can exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Invite,
    Accept,
    Decline,
    Block,
    Unblock,
    Message,
}

impl ActionKind {
    pub const ALL: [ActionKind; 6] = [
        ActionKind::Invite,
        ActionKind::Accept,
        ActionKind::Decline,
        ActionKind::Block,
        ActionKind::Unblock,
        ActionKind::Message,
    ];

    fn requested_name(self) -> &'static str {
        match self {
            ActionKind::Invite => "INVITE",
            ActionKind::Accept => "ACCEPT",
            ActionKind::Decline => "DECLINE",
            ActionKind::Block => "BLOCK",
            ActionKind::Unblock => "UNBLOCK",
            ActionKind::Message => "MESSAGE",
        }
    }

    fn confirmed_name(self) -> &'static str {
        match self {
            ActionKind::Invite => "INVITED",
            ActionKind::Accept => "ACCEPTED",
            ActionKind::Decline => "DECLINED",
            ActionKind::Block => "BLOCKED",
            ActionKind::Unblock => "UNBLOCKED",
            ActionKind::Message => "MESSAGED",
        }
    }

    // "MESSANGER" is the relay's spelling
    fn acknowledger_name(self) -> &'static str {
        match self {
            ActionKind::Invite => "INVITER",
            ActionKind::Accept => "ACCEPTER",
            ActionKind::Decline => "DECLINER",
            ActionKind::Block => "BLOCKER",
            ActionKind::Unblock => "UNBLOCKER",
            ActionKind::Message => "MESSANGER",
        }
    }

    /// Parse a command name as typed by a user (`invite`, `msg`, ...)
    pub fn from_command(command: &str) -> Option<ActionKind> {
        match command.to_ascii_lowercase().as_str() {
            "invite" => Some(ActionKind::Invite),
            "accept" => Some(ActionKind::Accept),
            "decline" => Some(ActionKind::Decline),
            "block" => Some(ActionKind::Block),
            "unblock" => Some(ActionKind::Unblock),
            "message" | "msg" => Some(ActionKind::Message),
            _ => None,
        }
    }
}

/// Which side of the relationship performed the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The local owner performed the action
    Initiator,
    /// The peer performed the action against the owner
    Acknowledger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Requested,
    Confirmed,
}

/// One state machine viewed from two sides.
///
/// Serialized to the relay vocabulary: `INVITE` (requested by the owner),
/// `INVITED` (confirmed to the owner) and `INVITER` (performed by the peer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HangoutState {
    action: ActionKind,
    role: Role,
    phase: Phase,
}

impl HangoutState {
    /// An owner action that has not been confirmed yet
    pub fn requested(action: ActionKind) -> Self {
        Self { action, role: Role::Initiator, phase: Phase::Requested }
    }

    /// An owner action confirmed by the counterpart
    pub fn confirmed(action: ActionKind) -> Self {
        Self { action, role: Role::Initiator, phase: Phase::Confirmed }
    }

    /// An action the peer performed; it reached us, so it is confirmed
    pub fn received(action: ActionKind) -> Self {
        Self { action, role: Role::Acknowledger, phase: Phase::Confirmed }
    }

    pub fn action(&self) -> ActionKind {
        self.action
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_chat_message(&self) -> bool {
        self.action == ActionKind::Message
    }

    pub fn as_str(&self) -> &'static str {
        match (self.role, self.phase) {
            (Role::Initiator, Phase::Requested) => self.action.requested_name(),
            (Role::Initiator, Phase::Confirmed) => self.action.confirmed_name(),
            (Role::Acknowledger, _) => self.action.acknowledger_name(),
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        ActionKind::ALL.iter().find_map(|&action| {
            if name == action.requested_name() {
                Some(Self::requested(action))
            } else if name == action.confirmed_name() {
                Some(Self::confirmed(action))
            } else if name == action.acknowledger_name() {
                Some(Self::received(action))
            } else {
                None
            }
        })
    }
}

impl fmt::Display for HangoutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for HangoutState {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        HangoutState::parse(&value).ok_or_else(|| format!("unknown hangout state '{}'", value))
    }
}

impl From<HangoutState> for String {
    fn from(state: HangoutState) -> Self {
        state.as_str().to_string()
    }
}

/// A chat line within a peer's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    pub timestamp: i64,
    #[serde(default)]
    pub delivered: bool,
    #[serde(default)]
    pub read: bool,
    /// The local user who persisted this copy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

impl Message {
    /// Keep flags already earned by the same message
    pub fn merge_flags_from(&mut self, previous: &Message) {
        if self.timestamp == previous.timestamp {
            self.delivered |= previous.delivered;
            self.read |= previous.read;
        }
    }
}

/// The single evolving relationship record between the owner and one peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hangout {
    #[serde(rename = "username")]
    pub peer_id: String,
    #[serde(rename = "email", default, skip_serializing_if = "Option::is_none")]
    pub peer_email: Option<String>,
    pub state: HangoutState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    /// Creation time of the action, also its correlation id
    pub timestamp: i64,
    #[serde(default)]
    pub delivered: bool,
    #[serde(default)]
    pub read: bool,
}

impl Hangout {
    /// A blank record used to focus a peer before any action exists
    pub fn for_peer(peer_id: &str, peer_email: Option<String>) -> Self {
        Hangout {
            peer_id: peer_id.to_string(),
            peer_email,
            state: HangoutState::requested(ActionKind::Invite),
            message: None,
            timestamp: 0,
            delivered: false,
            read: true,
        }
    }

    pub fn is_same_action(&self, other: &Hangout) -> bool {
        self.peer_id == other.peer_id && self.timestamp == other.timestamp
    }

    /// `delivered` and `read` never regress for the same originating action
    pub fn merge_flags_from(&mut self, previous: &Hangout) {
        if self.timestamp == previous.timestamp {
            self.delivered |= previous.delivered;
            self.read |= previous.read;
        }
    }
}

/// The local user on this device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub username: String,
    pub email: Option<String>,
}

impl Owner {
    pub fn new(username: &str) -> Self {
        Owner { username: username.to_string(), email: None }
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
