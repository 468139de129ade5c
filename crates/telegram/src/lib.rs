//! Telegram Bot API adapters for the intake pipeline.
//!
//! Long polling feeds [`hoarder_intake::UpdateSource`]; sends go through
//! [`hoarder_intake::Outbound`].

pub mod bot;
pub mod config;
pub mod error;
pub mod outbound;
pub mod updates;

pub use {
    bot::{Connected, connect},
    config::TelegramConfig,
    error::{Error, Result},
    outbound::TelegramOutbound,
    updates::TelegramUpdates,
};
