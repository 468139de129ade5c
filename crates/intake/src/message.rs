use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of one participant's private conversation.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ParticipantId(pub i64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque transport reference to an already uploaded attachment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachmentRef(pub String);

impl AttachmentRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Routing classification of the chat a message arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatClass {
    Private,
    Administrative,
    Other,
}

/// One physical event as returned by a single fetch.
#[derive(Debug, Clone)]
pub struct RawEvent {
    /// Monotonic event id assigned by the provider.
    pub id: i64,
    /// `None` for event kinds the intake does not handle; they still advance
    /// the cursor.
    pub message: Option<RawMessage>,
}

/// Transport-neutral view of one inbound chat message.
#[derive(Debug, Clone, Default)]
pub struct RawMessage {
    pub chat_id: i64,
    pub private: bool,
    pub sender: ParticipantId,
    /// Public contact handle of the sender, without the leading `@`.
    pub handle: Option<String>,
    pub text: Option<String>,
    pub attachment: Option<AttachmentRef>,
    /// Correlates the physical parts of one multi-attachment post.
    pub batch_id: Option<String>,
}

/// A reassembled inbound unit: every part of one multi-part post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalMessage {
    pub sender: ParticipantId,
    pub handle: Option<String>,
    pub chat_id: i64,
    pub chat: ChatClass,
    pub text: Option<String>,
    pub attachments: Vec<AttachmentRef>,
    pub batch_id: Option<String>,
}

impl LogicalMessage {
    /// Text of the message, if it carries any non-empty text.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.is_empty())
    }

    pub fn has_text(&self) -> bool {
        self.text().is_some()
    }

    /// Whether the text is exactly `label` (button presses arrive this way).
    pub fn is_text(&self, label: &str) -> bool {
        self.text() == Some(label)
    }

    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }
}


#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::{fixtures::*, *};

    #[test]
    fn empty_text_counts_as_no_text() {
        let msg = private_text(1, "");
        assert!(!msg.has_text());
        assert_eq!(msg.text(), None);
    }

    #[test]
    fn is_text_matches_exact_label_only() {
        let msg = private_text(1, "Continue");
        assert!(msg.is_text("Continue"));
        assert!(!msg.is_text("continue"));
        assert!(!msg.is_text("Continue "));
    }

    #[test]
    fn participant_id_serializes_as_plain_number() {
        let json = serde_json::to_string(&ParticipantId(42)).unwrap();
        assert_eq!(json, "42");
    }
}
