//! Drives one participant through the form.

use tracing::{debug, info, warn};

use crate::{
    error::Error,
    form::{CollectPolicy, Draft, FieldValue, Form, Step, StepKind, Submission},
    message::LogicalMessage,
    queue::OutboundQueue,
    registry::{Cancelled, ConversationRegistry, ConversationTicket},
    replacements::Replacements,
    texts::fill,
    transport::{Destination, Keyboard, Outbound, send_post},
};

/// How a conversation ended, when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Submitted(Submission),
    Cancelled,
}

/// Why a step stopped early.
enum Interrupt {
    Cancelled,
    Failed(Error),
}

impl From<Error> for Interrupt {
    fn from(e: Error) -> Self {
        Self::Failed(e)
    }
}

impl From<Cancelled> for Interrupt {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

type StepResult<T> = Result<T, Interrupt>;

/// Borrowed view of everything one conversation needs.
pub struct StepEngine<'a> {
    pub registry: &'a ConversationRegistry,
    pub outbound: &'a dyn Outbound,
    pub replacements: &'a Replacements,
    pub queue: &'a OutboundQueue,
    pub form: &'a Form,
}

impl StepEngine<'_> {
    /// Walk every step for `ticket`'s participant, then enqueue the result.
    ///
    /// The registry entry is released on every exit path. Cancellation is an
    /// [`Outcome`], not an error; the cancelling side sends the notice.
    pub async fn run(&self, ticket: ConversationTicket, handle: &str) -> crate::Result<Outcome> {
        let participant = ticket.participant();
        info!(%participant, "conversation started");
        let result = self.walk(&ticket, handle).await;
        self.registry.close(&ticket);

        match result {
            Ok(submission) => {
                info!(
                    %participant,
                    attachments = submission.attachments.len(),
                    "submission queued"
                );
                let texts = self.form.texts();
                if let Err(e) = self
                    .outbound
                    .send_text(
                        &participant.into(),
                        &texts.queued,
                        Some(&Keyboard::single(texts.entry_button.as_str())),
                    )
                    .await
                {
                    warn!(%participant, error = %e, "failed to send queued notice");
                }
                Ok(Outcome::Submitted(submission))
            },
            Err(Interrupt::Cancelled) => {
                info!(%participant, "conversation cancelled");
                Ok(Outcome::Cancelled)
            },
            Err(Interrupt::Failed(e)) => Err(e),
        }
    }

    async fn walk(&self, ticket: &ConversationTicket, handle: &str) -> StepResult<Submission> {
        let mut draft = Draft::default();
        for step in self.form.steps() {
            let value = self.run_step(ticket, handle, &step, &draft).await?;
            debug!(participant = %ticket.participant(), field = %step.field, "step completed");
            draft.set(step.field, value);
        }
        let submission = self.form.compose(handle, &draft)?;
        self.queue.enqueue(submission.clone());
        Ok(submission)
    }

    async fn run_step(
        &self,
        ticket: &ConversationTicket,
        handle: &str,
        step: &Step,
        draft: &Draft,
    ) -> StepResult<FieldValue> {
        let to = Destination::from(ticket.participant());
        self.prompt(&to, &step.prompt, &step.keyboard).await?;
        if step.preview {
            let preview = self.form.compose(handle, draft)?;
            send_post(self.outbound, &to, &preview.attachments, &preview.text).await?;
        }

        match step.kind {
            StepKind::Single {
                ref validators,
                ref transform,
            } => loop {
                let message = self.next_message(ticket).await?;
                if let Some(failed) = validators.iter().find(|v| !v.check(&message)) {
                    self.outbound.send_text(&to, &failed.failure, None).await?;
                    continue;
                }
                let normalize = |s: &str| self.replacements.normalize(s);
                match transform.apply(&message, &normalize) {
                    Some(value) => return Ok(value),
                    None => {
                        warn!(field = %step.field, "accepted message produced no value");
                        let notice = &self.form.texts().press_one_of_buttons;
                        self.outbound.send_text(&to, notice, None).await?;
                    },
                }
            },
            StepKind::Collect(ref policy) => {
                self.collect(ticket, &to, step, policy).await
            },
        }
    }

    async fn collect(
        &self,
        ticket: &ConversationTicket,
        to: &Destination,
        step: &Step,
        policy: &CollectPolicy,
    ) -> StepResult<FieldValue> {
        let more_keyboard = Keyboard::single(policy.continue_label.as_str());
        let mut collected = Vec::new();

        loop {
            let message = self.next_message(ticket).await?;

            if message.has_attachments() {
                collected.extend(message.attachments);
                if collected.len() > policy.max {
                    debug!(
                        participant = %ticket.participant(),
                        count = collected.len(),
                        max = policy.max,
                        "too many attachments, restarting"
                    );
                    collected.clear();
                    self.outbound.send_text(to, &policy.too_many, None).await?;
                    self.prompt(to, &step.prompt, &step.keyboard).await?;
                    continue;
                }
                let more = fill(&policy.more_prompt, &[
                    ("count", collected.len()),
                    ("max", policy.max),
                ]);
                let keyboard = if collected.len() >= policy.min {
                    &more_keyboard
                } else {
                    &step.keyboard
                };
                self.prompt(to, &more, keyboard).await?;
            } else if message.is_text(&policy.continue_label) {
                if collected.len() >= policy.min {
                    return Ok(FieldValue::Attachments(collected));
                }
                self.outbound.send_text(to, &policy.not_enough, None).await?;
            } else {
                self.outbound.send_text(to, &policy.required, None).await?;
            }
        }
    }

    /// Send `text` with `keyboard` plus the cancel button.
    async fn prompt(&self, to: &Destination, text: &str, keyboard: &Keyboard) -> crate::Result<()> {
        let keyboard = keyboard
            .clone()
            .row([self.form.texts().cancel_button.as_str()]);
        self.outbound.send_text(to, text, Some(&keyboard)).await
    }

    async fn next_message(&self, ticket: &ConversationTicket) -> StepResult<LogicalMessage> {
        let wait = self.registry.begin_wait(ticket)?;
        Ok(wait.recv().await?)
    }
}
