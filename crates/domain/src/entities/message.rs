//! Message entity - one entry in the session's message log
//!
//! Entries are immutable once appended. A local optimistic echo is appended
//! with `provisional = true` and later replaced (not edited) by the server's
//! authoritative copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::MessageId;

/// What produced a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Chat,
    Action,
    DiceRoll,
    RollRequest,
    DiceCheckResult,
    System,
    AiDm,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Action => "action",
            Self::DiceRoll => "dice_roll",
            Self::RollRequest => "roll_request",
            Self::DiceCheckResult => "dice_check_result",
            Self::System => "system",
            Self::AiDm => "ai_dm",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a dice roll as reported in the log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceRollMetadata {
    pub notation: String,
    pub rolls: Vec<u32>,
    pub total: i32,
    pub modifier: i32,
    pub is_critical: bool,
    pub is_fumble: bool,
    pub purpose: Option<String>,
}

/// A DM request for a roll
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollRequestMetadata {
    pub ability_or_skill: Option<String>,
    pub dc: Option<i32>,
    pub advantage: bool,
    pub disadvantage: bool,
    pub roll_type: Option<String>,
    pub modifier: Option<i32>,
}

/// Outcome of a skill check resolved by the server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResultMetadata {
    pub base_roll: i32,
    pub modifier: i32,
    pub final_total: i32,
    pub dc: Option<i32>,
    pub success: bool,
    pub skill: Option<String>,
}

/// Kind-specific payload. The message kind is derived from the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageMetadata {
    Chat {
        is_ooc: bool,
    },
    Action,
    DiceRoll(DiceRollMetadata),
    RollRequest(RollRequestMetadata),
    DiceCheckResult(CheckResultMetadata),
    System {
        is_error: bool,
    },
    AiDm {
        in_response_to: Option<String>,
        is_fallback: bool,
    },
}

impl MessageMetadata {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Chat { .. } => MessageKind::Chat,
            Self::Action => MessageKind::Action,
            Self::DiceRoll(_) => MessageKind::DiceRoll,
            Self::RollRequest(_) => MessageKind::RollRequest,
            Self::DiceCheckResult(_) => MessageKind::DiceCheckResult,
            Self::System { .. } => MessageKind::System,
            Self::AiDm { .. } => MessageKind::AiDm,
        }
    }
}

/// A log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    /// Display name of whoever produced the entry ("System" for server notices)
    pub author: String,
    pub author_id: Option<String>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: MessageMetadata,
    /// Local optimistic echo awaiting confirmation
    pub provisional: bool,
    /// Correlates an echo with the server's copy
    pub client_message_id: Option<String>,
}

impl Message {
    /// Author on local echoes when the player's name is unknown
    pub const LOCAL_AUTHOR: &'static str = "You";

    /// Create a confirmed entry stamped now
    pub fn new(
        author: impl Into<String>,
        content: impl Into<String>,
        metadata: MessageMetadata,
    ) -> Self {
        Self {
            id: MessageId::new(),
            author: author.into(),
            author_id: None,
            content: content.into(),
            timestamp: Utc::now(),
            metadata,
            provisional: false,
            client_message_id: None,
        }
    }

    /// Server notice
    pub fn system(content: impl Into<String>, is_error: bool) -> Self {
        Self::new("System", content, MessageMetadata::System { is_error })
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_author_id(mut self, author_id: impl Into<String>) -> Self {
        self.author_id = Some(author_id.into());
        self
    }

    pub fn with_client_message_id(mut self, id: impl Into<String>) -> Self {
        self.client_message_id = Some(id.into());
        self
    }

    /// Mark as a local echo
    pub fn into_provisional(mut self) -> Self {
        self.provisional = true;
        self
    }

    pub fn kind(&self) -> MessageKind {
        self.metadata.kind()
    }

    /// Whether this confirmed entry is the authoritative copy of `echo`.
    ///
    /// Correlation ids win when both sides carry one. Otherwise kind and
    /// content must match, and so must the author when the echo names one.
    pub fn confirms(&self, echo: &Message) -> bool {
        if !echo.provisional || self.provisional {
            return false;
        }
        if let (Some(a), Some(b)) = (&self.client_message_id, &echo.client_message_id) {
            return a == b;
        }
        self.kind() == echo.kind() && self.content == echo.content && self.same_author(echo)
    }

    fn same_author(&self, echo: &Message) -> bool {
        if let (Some(a), Some(b)) = (&self.author_id, &echo.author_id) {
            return a == b;
        }
        let named = echo.author.trim();
        if named.is_empty() || named == Self::LOCAL_AUTHOR {
            return true;
        }
        self.author.trim().eq_ignore_ascii_case(named)
    }
}
