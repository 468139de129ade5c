//! Conversational intake: turns chat messages into listings and publishes
//! them at a throttled rate.
//!
//! Inbound events are coalesced into logical messages by the [`batcher`],
//! routed by [`Intake`], and handed to a suspended [`engine::StepEngine`]
//! through the per-participant [`registry`]. Finished submissions wait in the
//! [`queue`] until the [`queue::Publisher`] drains them.

pub mod admin;
pub mod batcher;
pub mod config;
pub mod engine;
pub mod error;
pub mod form;
pub mod intake;
pub mod message;
pub mod queue;
pub mod registry;
pub mod replacements;
pub mod texts;
pub mod transport;

pub use {
    config::IntakeConfig,
    error::{Error, Result},
    intake::Intake,
    message::{AttachmentRef, ChatClass, LogicalMessage, ParticipantId, RawEvent, RawMessage},
    queue::{DrainOrder, Publisher},
    texts::Texts,
    transport::{Destination, Keyboard, Outbound, UpdateSource},
};
