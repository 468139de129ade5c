//! Buffer of finished submissions and the throttled publisher that drains it.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use {
    serde::{Deserialize, Serialize},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info},
};

use crate::{
    form::Submission,
    transport::{Destination, Outbound, send_post},
};

/// Which end of the queue the publisher takes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrainOrder {
    /// Most recent submission first.
    #[default]
    Lifo,
    Fifo,
}

/// Unbounded in-memory queue. Nothing survives a restart.
#[derive(Debug)]
pub struct OutboundQueue {
    order: DrainOrder,
    items: Mutex<VecDeque<Submission>>,
}

impl OutboundQueue {
    pub fn new(order: DrainOrder) -> Self {
        Self {
            order,
            items: Mutex::new(VecDeque::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Submission>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn enqueue(&self, submission: Submission) {
        let mut items = self.lock();
        items.push_back(submission);
        debug!(queued = items.len(), "submission enqueued");
    }

    pub fn take(&self) -> Option<Submission> {
        let mut items = self.lock();
        match self.order {
            DrainOrder::Lifo => items.pop_back(),
            DrainOrder::Fifo => items.pop_front(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// What one publisher tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Idle,
    Published,
    /// Publishing failed; the submission is gone.
    Dropped,
}

pub struct Publisher {
    queue: Arc<OutboundQueue>,
    outbound: Arc<dyn Outbound>,
    destination: Destination,
    interval: Duration,
}

impl Publisher {
    pub fn new(
        queue: Arc<OutboundQueue>,
        outbound: Arc<dyn Outbound>,
        destination: Destination,
        interval: Duration,
    ) -> Self {
        Self {
            queue,
            outbound,
            destination,
            interval,
        }
    }

    /// Publish at most one submission. Failures are logged and never retried.
    pub async fn publish_next(&self) -> Tick {
        let Some(submission) = self.queue.take() else {
            debug!("no submissions queued");
            return Tick::Idle;
        };
        match send_post(
            &*self.outbound,
            &self.destination,
            &submission.attachments,
            &submission.text,
        )
        .await
        {
            Ok(()) => {
                info!(
                    destination = %self.destination,
                    attachments = submission.attachments.len(),
                    remaining = self.queue.len(),
                    "submission published"
                );
                Tick::Published
            },
            Err(e) => {
                error!(
                    destination = %self.destination,
                    error = %e,
                    "failed to publish submission, dropping it"
                );
                Tick::Dropped
            },
        }
    }

    /// One tick per interval until `cancel` fires. The interval is slept after
    /// every tick, whether anything was published or not.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            destination = %self.destination,
            interval_secs = self.interval.as_secs(),
            "publisher started"
        );
        while !cancel.is_cancelled() {
            self.publish_next().await;
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.interval) => {},
            }
        }
        info!(queued = self.queue.len(), "publisher stopped");
    }
}
