use {
    secrecy::ExposeSecret,
    teloxide::{prelude::*, types::BotCommand},
    tracing::{info, warn},
};

use crate::{config::TelegramConfig, error::Result};

/// A bot with verified credentials, ready for long polling.
#[derive(Clone)]
pub struct Connected {
    pub bot: Bot,
    pub username: Option<String>,
}

/// Build the bot client and prepare the account for long polling.
pub async fn connect(config: &TelegramConfig) -> Result<Connected> {
    // The HTTP client must not give up before the long poll returns.
    let client = teloxide::net::default_reqwest_settings()
        .timeout(config.client_timeout())
        .build()?;
    let bot = Bot::with_client(config.token.expose_secret(), client);
    prepare(bot).await
}

/// Verify credentials, clear any webhook and register the command list.
pub async fn prepare(bot: Bot) -> Result<Connected> {
    let me = bot.get_me().await?;
    let username = me.username.clone();

    // A webhook blocks getUpdates.
    bot.delete_webhook().send().await?;

    let commands = vec![BotCommand::new("start", "Offer an item for the channel")];
    if let Err(e) = bot.set_my_commands(commands).await {
        warn!("failed to register bot commands: {e}");
    }

    info!(username = ?username, "telegram bot connected (webhook cleared)");
    Ok(Connected { bot, username })
}
