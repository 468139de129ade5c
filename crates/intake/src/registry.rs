//! Per-participant rendezvous between a suspended step and the delivery path.
//!
//! Every running conversation owns one entry. While a step is waiting the
//! entry holds the sending half of a one-shot channel; delivery takes the
//! sender out and hands the message over in the same critical section, so a
//! slot is filled at most once. Cancellation removes the entry, which drops
//! the sender and resolves the waiter with [`Cancelled`].
//!
//! Conversations are tagged with a generation so a cancelled conversation that
//! reaches its next wait late can never claim the slot of a newer one.

use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
};

use {
    thiserror::Error,
    tokio::sync::oneshot,
    tracing::{debug, warn},
};

use crate::{
    error::{Error, Result},
    message::{LogicalMessage, ParticipantId},
};

/// Raised at a wait point when the conversation was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("conversation cancelled")]
pub struct Cancelled;

/// Outcome of handing a message to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// A waiting step received the message.
    Delivered,
    /// No step was waiting; the message was dropped.
    Discarded,
}

/// Proof that a conversation was opened; required to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationTicket {
    participant: ParticipantId,
    generation: u64,
}

impl ConversationTicket {
    pub fn participant(&self) -> ParticipantId {
        self.participant
    }
}

enum Slot {
    /// Conversation running, no step waiting.
    Open,
    /// A step is suspended until the next message arrives.
    Pending(oneshot::Sender<LogicalMessage>),
}

struct Entry {
    generation: u64,
    slot: Slot,
}

/// A registered wait. Resolves once with the next message or [`Cancelled`].
#[must_use = "a pending wait does nothing unless received"]
pub struct PendingWait {
    rx: oneshot::Receiver<LogicalMessage>,
}

impl PendingWait {
    fn cancelled() -> Self {
        let (_, rx) = oneshot::channel();
        Self { rx }
    }

    pub async fn recv(self) -> std::result::Result<LogicalMessage, Cancelled> {
        self.rx.await.map_err(|_| Cancelled)
    }
}

#[derive(Default)]
pub struct ConversationRegistry {
    entries: Mutex<HashMap<ParticipantId, Entry>>,
    generations: AtomicU64,
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ParticipantId, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark a conversation as running. Returns `None` if one already is.
    pub fn open(&self, participant: ParticipantId) -> Option<ConversationTicket> {
        let mut entries = self.lock();
        if entries.contains_key(&participant) {
            return None;
        }
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        entries.insert(participant, Entry {
            generation,
            slot: Slot::Open,
        });
        debug!(%participant, generation, "conversation opened");
        Some(ConversationTicket {
            participant,
            generation,
        })
    }

    /// Register a wait for the next message of `ticket`'s participant.
    ///
    /// If the conversation has been cancelled since the ticket was issued,
    /// the returned wait resolves to [`Cancelled`] on first poll.
    pub fn begin_wait(&self, ticket: &ConversationTicket) -> Result<PendingWait> {
        let participant = ticket.participant;
        let mut entries = self.lock();
        let Some(entry) = entries
            .get_mut(&participant)
            .filter(|e| e.generation == ticket.generation)
        else {
            debug!(%participant, "wait on a cancelled conversation");
            return Ok(PendingWait::cancelled());
        };

        if let Slot::Pending(ref tx) = entry.slot {
            if !tx.is_closed() {
                return Err(Error::WaitAlreadyPending { participant });
            }
            warn!(%participant, "reclaiming slot of an abandoned wait");
        }

        let (tx, rx) = oneshot::channel();
        entry.slot = Slot::Pending(tx);
        debug!(%participant, "waiting for message");
        Ok(PendingWait { rx })
    }

    /// Hand `message` to the step waiting on `participant`, if any.
    pub fn deliver(&self, participant: ParticipantId, message: LogicalMessage) -> Delivery {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(&participant) else {
            return Delivery::Discarded;
        };
        match std::mem::replace(&mut entry.slot, Slot::Open) {
            Slot::Pending(tx) => match tx.send(message) {
                Ok(()) => {
                    debug!(%participant, "message delivered");
                    Delivery::Delivered
                },
                Err(_) => {
                    warn!(%participant, "waiter went away before delivery");
                    Delivery::Discarded
                },
            },
            Slot::Open => {
                debug!(%participant, "no step waiting, message discarded");
                Delivery::Discarded
            },
        }
    }

    /// Remove the conversation and any pending slot. Returns whether one existed.
    pub fn cancel(&self, participant: ParticipantId) -> bool {
        let removed = self.lock().remove(&participant).is_some();
        if removed {
            debug!(%participant, "conversation cancelled");
        }
        removed
    }

    /// Forget a finished conversation. A newer conversation is left untouched.
    pub fn close(&self, ticket: &ConversationTicket) {
        let mut entries = self.lock();
        if entries
            .get(&ticket.participant)
            .is_some_and(|e| e.generation == ticket.generation)
        {
            entries.remove(&ticket.participant);
            debug!(participant = %ticket.participant, "conversation closed");
        }
    }

    pub fn is_open(&self, participant: ParticipantId) -> bool {
        self.lock().contains_key(&participant)
    }

    /// Whether a step is currently waiting for `participant`.
    pub fn is_waiting(&self, participant: ParticipantId) -> bool {
        self.lock()
            .get(&participant)
            .is_some_and(|e| matches!(e.slot, Slot::Pending(ref tx) if !tx.is_closed()))
    }

    /// Number of slots currently pending, across all participants.
    pub fn pending_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|e| matches!(e.slot, Slot::Pending(_)))
            .count()
    }
}
