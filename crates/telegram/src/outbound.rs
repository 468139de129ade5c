use std::{future::Future, time::Duration};

use {
    async_trait::async_trait,
    teloxide::{
        RequestError,
        payloads::SendMessageSetters,
        prelude::*,
        types::{
            ChatId, InputFile, InputMedia, InputMediaPhoto, KeyboardButton, KeyboardMarkup,
            ParseMode, Recipient,
        },
    },
    tracing::{debug, warn},
};

use hoarder_intake::{AttachmentRef, Destination, Keyboard, Outbound};

use crate::error::{is_destination_unavailable, send_error};

const TELEGRAM_RETRY_AFTER_MAX_RETRIES: usize = 4;

/// Caption size limit for media messages.
pub const TELEGRAM_CAPTION_LIMIT: usize = 1024;

/// [`Outbound`] backed by the Bot API.
pub struct TelegramOutbound {
    bot: Bot,
}

impl TelegramOutbound {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn recipient(to: &Destination) -> Recipient {
    match to {
        Destination::Chat(id) => Recipient::Id(ChatId(*id)),
        Destination::Channel(name) if name.starts_with('@') => {
            Recipient::ChannelUsername(name.clone())
        },
        Destination::Channel(name) => Recipient::ChannelUsername(format!("@{name}")),
    }
}

fn reply_keyboard(keyboard: &Keyboard) -> KeyboardMarkup {
    KeyboardMarkup::new(
        keyboard
            .rows
            .iter()
            .map(|row| row.iter().map(|label| KeyboardButton::new(label.as_str()))),
    )
    .resize_keyboard()
}

/// Photos of a group; only the first one carries the caption.
fn media_group(attachments: &[AttachmentRef], caption: Option<&str>) -> Vec<InputMedia> {
    attachments
        .iter()
        .enumerate()
        .map(|(i, attachment)| {
            let photo = InputMediaPhoto::new(InputFile::file_id(attachment.as_str()));
            let photo = match caption {
                Some(caption) if i == 0 => photo.caption(caption).parse_mode(ParseMode::Html),
                _ => photo,
            };
            InputMedia::Photo(photo)
        })
        .collect()
}

fn retry_after_duration(error: &RequestError) -> Option<Duration> {
    match error {
        RequestError::RetryAfter(wait) => Some(wait.duration()),
        _ => None,
    }
}

/// Run `request`, sleeping through `RetryAfter` responses a bounded number of
/// times.
async fn with_retry<T, F, Fut>(
    to: &Destination,
    operation: &'static str,
    mut request: F,
) -> Result<T, RequestError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RequestError>>,
{
    let mut retries = 0usize;

    loop {
        match request().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let Some(wait) = retry_after_duration(&err) else {
                    return Err(err);
                };

                if retries >= TELEGRAM_RETRY_AFTER_MAX_RETRIES {
                    warn!(
                        chat_id = %to,
                        operation,
                        retries,
                        max_retries = TELEGRAM_RETRY_AFTER_MAX_RETRIES,
                        retry_after_secs = wait.as_secs(),
                        "telegram rate limit persisted after retries"
                    );
                    return Err(err);
                }

                retries += 1;
                warn!(
                    chat_id = %to,
                    operation,
                    retries,
                    max_retries = TELEGRAM_RETRY_AFTER_MAX_RETRIES,
                    retry_after_secs = wait.as_secs(),
                    "telegram rate limited, waiting before retry"
                );
                tokio::time::sleep(wait).await;
            },
        }
    }
}

impl TelegramOutbound {
    async fn send_message(
        &self,
        to: &Destination,
        text: &str,
        keyboard: Option<&KeyboardMarkup>,
        html: bool,
    ) -> Result<(), RequestError> {
        let operation = if html {
            "send message (html)"
        } else {
            "send message (plain)"
        };
        with_retry(to, operation, || {
            let mut req = self.bot.send_message(recipient(to), text);
            if html {
                req = req.parse_mode(ParseMode::Html);
            }
            if let Some(kb) = keyboard {
                req = req.reply_markup(kb.clone());
            }
            async move { req.await }
        })
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl Outbound for TelegramOutbound {
    async fn send_text(
        &self,
        to: &Destination,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> hoarder_intake::Result<()> {
        let markup = keyboard.map(reply_keyboard);
        debug!(chat_id = %to, text_len = text.len(), "telegram outbound text send");

        match self.send_message(to, text, markup.as_ref(), true).await {
            Ok(()) => Ok(()),
            Err(e) if is_destination_unavailable(&e) => Err(send_error(e, to)),
            Err(e) => {
                warn!(
                    chat_id = %to,
                    error = %e,
                    "telegram HTML send failed, retrying as plain text"
                );
                self.send_message(to, text, markup.as_ref(), false)
                    .await
                    .map_err(|e| send_error(e, to))
            },
        }
    }

    async fn send_attachment_group(
        &self,
        to: &Destination,
        attachments: &[AttachmentRef],
        caption: &str,
    ) -> hoarder_intake::Result<()> {
        // Too long for a caption: send the photos bare, then the text.
        let fits = caption.chars().count() <= TELEGRAM_CAPTION_LIMIT;
        let media = media_group(attachments, fits.then_some(caption));
        debug!(
            chat_id = %to,
            count = media.len(),
            caption_len = caption.len(),
            "telegram outbound media group send"
        );

        with_retry(to, "send media group", || {
            let req = self.bot.send_media_group(recipient(to), media.clone());
            async move { req.await }
        })
        .await
        .map_err(|e| send_error(e, to))?;

        if !fits {
            self.send_text(to, caption, None).await?;
        }
        Ok(())
    }
}
