//! Reassembly of raw transport events into logical messages.
//!
//! A multi-attachment post arrives as several physical events sharing a batch
//! id. Within one fetch cycle those parts are folded into a single
//! [`LogicalMessage`]. Parts of the same batch that straddle two cycles are
//! not stitched back together and surface as two messages.

use std::collections::HashMap;

use tracing::trace;

use crate::message::{ChatClass, LogicalMessage, RawEvent, RawMessage};

/// Result of scanning one fetch cycle.
#[derive(Debug, Default)]
pub struct IngestCycle {
    pub messages: Vec<LogicalMessage>,
    /// One past the highest event id seen, or `None` if the cycle was empty.
    pub next_cursor: Option<i64>,
}

/// Fold one cycle of raw events into logical messages, in provider order.
pub fn ingest(events: Vec<RawEvent>, admin_chat_id: i64) -> IngestCycle {
    let mut cycle = IngestCycle::default();
    let mut batches: HashMap<String, usize> = HashMap::new();

    for event in events {
        let after = event.id.saturating_add(1);
        cycle.next_cursor = Some(cycle.next_cursor.map_or(after, |c| c.max(after)));

        let Some(raw) = event.message else {
            trace!(update_id = event.id, "skipping non-message event");
            continue;
        };

        if let Some(batch_id) = raw.batch_id.as_deref()
            && let Some(existing) = batches
                .get(batch_id)
                .and_then(|&idx| cycle.messages.get_mut(idx))
        {
            existing.attachments.extend(raw.attachment);
            if existing.text.is_none() {
                existing.text = raw.text;
            }
            continue;
        }

        if let Some(ref batch_id) = raw.batch_id {
            batches.insert(batch_id.clone(), cycle.messages.len());
        }
        let chat = classify(&raw, admin_chat_id);
        cycle.messages.push(LogicalMessage {
            sender: raw.sender,
            handle: raw.handle,
            chat_id: raw.chat_id,
            chat,
            text: raw.text,
            attachments: raw.attachment.into_iter().collect(),
            batch_id: raw.batch_id,
        });
    }

    cycle
}

fn classify(raw: &RawMessage, admin_chat_id: i64) -> ChatClass {
    if raw.private {
        ChatClass::Private
    } else if raw.chat_id == admin_chat_id {
        ChatClass::Administrative
    } else {
        ChatClass::Other
    }
}
