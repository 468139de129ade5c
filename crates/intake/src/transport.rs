use std::{fmt, time::Duration};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

use crate::{
    error::Result,
    message::{AttachmentRef, ParticipantId, RawEvent},
};

// ── Destinations ────────────────────────────────────────────────────────────

/// Where an outbound message goes: a chat by numeric id or a public channel
/// by its `@name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum Destination {
    Chat(i64),
    Channel(String),
}

impl Destination {
    /// Numeric strings become [`Destination::Chat`]; anything else is taken as
    /// a channel name.
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim();
        match trimmed.parse::<i64>() {
            Ok(id) => Self::Chat(id),
            Err(_) => Self::Channel(trimmed.to_string()),
        }
    }
}

/// Accepts a number or a string; numeric strings (as produced by `${VAR}`
/// substitution) are chat ids.
impl<'de> Deserialize<'de> for Destination {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Id(i64),
            Name(String),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Id(id) => Self::Chat(id),
            Repr::Name(name) => Self::parse(&name),
        })
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chat(id) => write!(f, "{id}"),
            Self::Channel(name) => f.write_str(name),
        }
    }
}

impl From<ParticipantId> for Destination {
    fn from(p: ParticipantId) -> Self {
        Self::Chat(p.0)
    }
}

impl Default for Destination {
    fn default() -> Self {
        Self::Chat(0)
    }
}

// ── Reply keyboards ─────────────────────────────────────────────────────────

/// Rows of reply buttons shown under the input field. Pressing one sends its
/// label back as plain text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyboard {
    pub rows: Vec<Vec<String>>,
}

impl Keyboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-button keyboard.
    pub fn single(label: impl Into<String>) -> Self {
        Self::new().row([label])
    }

    #[must_use]
    pub fn row<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let row: Vec<String> = labels.into_iter().map(Into::into).collect();
        if !row.is_empty() {
            self.rows.push(row);
        }
        self
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().flatten().map(String::as_str)
    }
}

// ── Transport seams ─────────────────────────────────────────────────────────

/// Send messages through the chat provider.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Send a text message, optionally replacing the reply keyboard.
    async fn send_text(
        &self,
        to: &Destination,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<()>;

    /// Send an ordered group of already uploaded attachments, with `caption`
    /// on the first one.
    async fn send_attachment_group(
        &self,
        to: &Destination,
        attachments: &[AttachmentRef],
        caption: &str,
    ) -> Result<()>;
}

/// Send a post body: as plain text when there is nothing attached, otherwise
/// as an attachment group captioned with the text.
pub async fn send_post(
    outbound: &dyn Outbound,
    to: &Destination,
    attachments: &[AttachmentRef],
    text: &str,
) -> Result<()> {
    if attachments.is_empty() {
        outbound.send_text(to, text, None).await
    } else {
        outbound.send_attachment_group(to, attachments, text).await
    }
}

/// Long-poll source of raw events.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Fetch events with id `>= cursor`, waiting at most `timeout` for the
    /// first one to arrive.
    async fn fetch(&self, cursor: Option<i64>, timeout: Duration) -> Result<Vec<RawEvent>>;
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
pub(crate) mod mock {
    use std::sync::Mutex;

    use super::*;

    /// One recorded outbound call.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Sent {
        Text {
            to: Destination,
            text: String,
            keyboard: Option<Keyboard>,
        },
        Group {
            to: Destination,
            attachments: Vec<AttachmentRef>,
            caption: String,
        },
    }

    impl Sent {
        pub fn text(&self) -> &str {
            match self {
                Self::Text { text, .. } => text,
                Self::Group { caption, .. } => caption,
            }
        }

        pub fn to(&self) -> &Destination {
            match self {
                Self::Text { to, .. } | Self::Group { to, .. } => to,
            }
        }
    }

    /// Records every call. Sends to a destination listed in `unavailable`
    /// fail with [`crate::Error::DestinationUnavailable`]; sends whose text is
    /// listed in `rejected_texts` fail with a plain error.
    #[derive(Default)]
    pub struct RecordingOutbound {
        pub sent: Mutex<Vec<(tokio::time::Instant, Sent)>>,
        pub unavailable: Vec<Destination>,
        pub rejected_texts: Vec<String>,
    }

    impl RecordingOutbound {
        pub fn sent(&self) -> Vec<Sent> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(_, s)| s.clone())
                .collect()
        }

        pub fn sent_to(&self, to: &Destination) -> Vec<Sent> {
            self.sent().into_iter().filter(|s| s.to() == to).collect()
        }

        pub fn last_text_to(&self, to: &Destination) -> Option<String> {
            self.sent_to(to).last().map(|s| s.text().to_string())
        }

        fn record(&self, to: &Destination, sent: Sent) -> Result<()> {
            if self.unavailable.contains(to) {
                return Err(crate::Error::destination_unavailable(to));
            }
            if self.rejected_texts.iter().any(|t| t == sent.text()) {
                return Err(crate::Error::message("send rejected"));
            }
            self.sent
                .lock()
                .unwrap()
                .push((tokio::time::Instant::now(), sent));
            Ok(())
        }
    }

    #[async_trait]
    impl Outbound for RecordingOutbound {
        async fn send_text(
            &self,
            to: &Destination,
            text: &str,
            keyboard: Option<&Keyboard>,
        ) -> Result<()> {
            self.record(to, Sent::Text {
                to: to.clone(),
                text: text.to_string(),
                keyboard: keyboard.cloned(),
            })
        }

        async fn send_attachment_group(
            &self,
            to: &Destination,
            attachments: &[AttachmentRef],
            caption: &str,
        ) -> Result<()> {
            self.record(to, Sent::Group {
                to: to.clone(),
                attachments: attachments.to_vec(),
                caption: caption.to_string(),
            })
        }
    }
}
