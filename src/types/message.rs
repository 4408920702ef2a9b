use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Identifies a message within its transcript.
///
/// Identifiers are assigned by the transcript in increasing order and are never reused.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role type for a message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System role.  Sent to the model, never displayed.
    System,

    /// User role.
    User,

    /// Assistant role.
    Assistant,
}

impl Role {
    /// The role as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique within the owning transcript.
    pub id: MessageId,

    /// Who authored the message.
    pub role: Role,

    /// The text of the message.  Mutable for the assistant message that is being filled in.
    pub content: String,

    /// When the message was appended.
    #[serde(with = "crate::utils::time")]
    pub created_at: OffsetDateTime,
}

impl Message {
    /// Create a new message stamped with the current time.
    pub fn new(id: MessageId, role: Role, content: impl Into<String>) -> Self {
        Self {
            id,
            role,
            content: content.into(),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Whether a chat view shows this message.
    pub fn is_displayed(&self) -> bool {
        self.role != Role::System
    }
}
