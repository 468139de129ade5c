//! Long-poll fetch and conversion of Telegram updates into raw events.

use std::time::Duration;

use {
    async_trait::async_trait,
    teloxide::{
        ApiError, RequestError,
        payloads::GetUpdatesSetters,
        prelude::*,
        types::{AllowedUpdate, MediaKind, MessageKind, UpdateKind},
    },
    tracing::{debug, trace},
};

use hoarder_intake::{AttachmentRef, ParticipantId, RawEvent, RawMessage, UpdateSource};

/// [`UpdateSource`] backed by `getUpdates`.
pub struct TelegramUpdates {
    bot: Bot,
}

impl TelegramUpdates {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl UpdateSource for TelegramUpdates {
    async fn fetch(
        &self,
        cursor: Option<i64>,
        timeout: Duration,
    ) -> hoarder_intake::Result<Vec<RawEvent>> {
        let mut request = self
            .bot
            .get_updates()
            .timeout(u32::try_from(timeout.as_secs()).unwrap_or(u32::MAX))
            .allowed_updates(vec![AllowedUpdate::Message]);
        if let Some(cursor) = cursor {
            request = request.offset(i32::try_from(cursor).unwrap_or(i32::MAX));
        }

        match request.await {
            Ok(updates) => {
                debug!(count = updates.len(), "got telegram updates");
                Ok(updates.into_iter().map(to_raw_event).collect())
            },
            Err(e @ RequestError::Api(ApiError::TerminatedByOtherGetUpdates)) => {
                Err(hoarder_intake::Error::SourceConflict {
                    message: e.to_string(),
                })
            },
            Err(e) => Err(hoarder_intake::Error::external("telegram getUpdates failed", e)),
        }
    }
}

/// Only plain messages carry content; every other update only moves the cursor.
pub fn to_raw_event(update: Update) -> RawEvent {
    let id = i64::from(update.id.0);
    let message = match update.kind {
        UpdateKind::Message(ref msg) => Some(to_raw_message(msg)),
        ref other => {
            trace!(update_id = id, "ignoring non-message update: {other:?}");
            None
        },
    };
    RawEvent { id, message }
}

pub fn to_raw_message(msg: &Message) -> RawMessage {
    let chat_id = msg.chat.id.0;
    let sender = msg
        .from
        .as_ref()
        .and_then(|u| i64::try_from(u.id.0).ok())
        .unwrap_or(chat_id);
    RawMessage {
        chat_id,
        private: msg.chat.is_private(),
        sender: ParticipantId(sender),
        handle: msg.from.as_ref().and_then(|u| u.username.clone()),
        text: extract_text(msg),
        attachment: extract_photo(msg),
        batch_id: msg.media_group_id().map(|id| id.to_string()),
    }
}

/// Text body, or the caption of a media message.
fn extract_text(msg: &Message) -> Option<String> {
    match &msg.kind {
        MessageKind::Common(common) => match &common.media_kind {
            MediaKind::Text(t) => Some(t.text.clone()),
            MediaKind::Photo(p) => p.caption.clone(),
            MediaKind::Document(d) => d.caption.clone(),
            MediaKind::Video(v) => v.caption.clone(),
            _ => None,
        },
        _ => None,
    }
}

/// The largest size of an attached photo.
fn extract_photo(msg: &Message) -> Option<AttachmentRef> {
    match &msg.kind {
        MessageKind::Common(common) => match &common.media_kind {
            MediaKind::Photo(p) => p.photo.last().map(|ps| AttachmentRef::new(ps.file.id.clone())),
            _ => None,
        },
        _ => None,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    fn user() -> serde_json::Value {
        json!({
            "id": 1001,
            "is_bot": false,
            "first_name": "Alice",
            "username": "alice"
        })
    }

    #[test]
    fn private_text_message() {
        let msg: Message = serde_json::from_value(json!({
            "message_id": 1,
            "date": 1,
            "chat": { "id": 1001, "type": "private", "first_name": "Alice" },
            "from": user(),
            "text": "Offer an item"
        }))
        .expect("deserialize text message");

        let raw = to_raw_message(&msg);
        assert!(raw.private);
        assert_eq!(raw.sender, ParticipantId(1001));
        assert_eq!(raw.handle.as_deref(), Some("alice"));
        assert_eq!(raw.text.as_deref(), Some("Offer an item"));
        assert!(raw.attachment.is_none());
        assert!(raw.batch_id.is_none());
    }

    #[test]
    fn album_photo_keeps_largest_size_and_group_id() {
        let msg: Message = serde_json::from_value(json!({
            "message_id": 2,
            "date": 1,
            "chat": { "id": 1001, "type": "private", "first_name": "Alice" },
            "from": user(),
            "media_group_id": "13579",
            "caption": "front side",
            "photo": [
                { "file_id": "small", "file_unique_id": "s", "width": 90, "height": 90, "file_size": 100 },
                { "file_id": "large", "file_unique_id": "l", "width": 1280, "height": 1280, "file_size": 90000 }
            ]
        }))
        .expect("deserialize photo message");

        let raw = to_raw_message(&msg);
        assert_eq!(raw.attachment, Some(AttachmentRef::new("large")));
        assert_eq!(raw.batch_id.as_deref(), Some("13579"));
        assert_eq!(raw.text.as_deref(), Some("front side"));
    }

    #[test]
    fn group_message_is_not_private() {
        let msg: Message = serde_json::from_value(json!({
            "message_id": 3,
            "date": 1,
            "chat": { "id": -100500, "type": "supergroup", "title": "Admins" },
            "from": user(),
            "text": "/help"
        }))
        .expect("deserialize group message");

        let raw = to_raw_message(&msg);
        assert!(!raw.private);
        assert_eq!(raw.chat_id, -100_500);
        assert_eq!(raw.sender, ParticipantId(1001));
    }

    #[test]
    fn user_without_username_has_no_handle() {
        let msg: Message = serde_json::from_value(json!({
            "message_id": 4,
            "date": 1,
            "chat": { "id": 1002, "type": "private", "first_name": "Bob" },
            "from": { "id": 1002, "is_bot": false, "first_name": "Bob" },
            "text": "hi"
        }))
        .expect("deserialize message");
        assert!(to_raw_message(&msg).handle.is_none());
    }

    // Update kinds are keyed on borrowed strings, so parse from text.
    fn parse_update(json: &str) -> Update {
        serde_json::from_str(json).expect("deserialize update")
    }

    #[test]
    fn non_message_update_only_carries_id() {
        let update = parse_update(
            r#"{
                "update_id": 77,
                "edited_message": {
                    "message_id": 5,
                    "date": 1,
                    "edit_date": 2,
                    "chat": { "id": 1001, "type": "private", "first_name": "Alice" },
                    "from": { "id": 1001, "is_bot": false, "first_name": "Alice", "username": "alice" },
                    "text": "edited"
                }
            }"#,
        );
        assert!(matches!(update.kind, UpdateKind::EditedMessage(_)));

        let event = to_raw_event(update);
        assert_eq!(event.id, 77);
        assert!(event.message.is_none());
    }

    #[test]
    fn message_update_is_converted() {
        let update = parse_update(
            r#"{
                "update_id": 78,
                "message": {
                    "message_id": 6,
                    "date": 1,
                    "chat": { "id": 1001, "type": "private", "first_name": "Alice" },
                    "from": { "id": 1001, "is_bot": false, "first_name": "Alice", "username": "alice" },
                    "text": "/start"
                }
            }"#,
        );
        assert!(matches!(update.kind, UpdateKind::Message(_)));

        let event = to_raw_event(update);
        assert_eq!(event.id, 78);
        let raw = event.message.expect("message update carries a message");
        assert!(raw.private);
        assert_eq!(raw.chat_id, 1001);
        assert_eq!(raw.sender, ParticipantId(1001));
        assert_eq!(raw.handle.as_deref(), Some("alice"));
        assert_eq!(raw.text.as_deref(), Some("/start"));
    }
}
