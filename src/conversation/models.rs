//! Data models for the conversation transcript

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable identifier of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TurnId(Uuid);

impl TurnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Author of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message in the transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: TurnId,
    pub role: Role,
    pub content: String,
    /// Urgency verdict of the triggering user turn
    pub is_emergency: bool,
    /// True while chunks are still being appended
    pub streaming: bool,
    /// Text written by the app rather than the model (welcome, fallback,
    /// stop notice); never sent upstream
    #[serde(default)]
    pub notice: bool,
    /// Position in the transcript, assigned by the store
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    fn build(role: Role, content: String, is_emergency: bool, streaming: bool) -> Self {
        Self {
            id: TurnId::new(),
            role,
            content,
            is_emergency,
            streaming,
            notice: false,
            sequence: 0,
            created_at: Utc::now(),
        }
    }

    /// A finalized user turn carrying the display text only
    pub fn user(content: impl Into<String>, is_emergency: bool) -> Self {
        Self::build(Role::User, content.into(), is_emergency, false)
    }

    /// A finalized assistant turn
    pub fn assistant(content: impl Into<String>, is_emergency: bool) -> Self {
        Self::build(Role::Assistant, content.into(), is_emergency, false)
    }

    /// A finalized assistant turn written by the app itself
    pub fn notice(content: impl Into<String>, is_emergency: bool) -> Self {
        Self {
            notice: true,
            ..Self::assistant(content, is_emergency)
        }
    }

    /// An empty assistant turn that will receive streamed chunks
    pub fn assistant_streaming(is_emergency: bool) -> Self {
        Self::build(Role::Assistant, String::new(), is_emergency, true)
    }
}

/// A `{role, content}` pair as sent to the completion service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub role: Role,
    pub content: String,
}

impl OutgoingMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

impl From<&Turn> for OutgoingMessage {
    fn from(turn: &Turn) -> Self {
        Self::new(turn.role, turn.content.clone())
    }
}
