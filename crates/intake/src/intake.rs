//! Routing of logical messages and the fetch loop that feeds it.

use std::{sync::Arc, time::Duration};

use {
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{
    admin,
    batcher::ingest,
    config::IntakeConfig,
    engine::StepEngine,
    error::{Error, Result},
    form::Form,
    message::{ChatClass, LogicalMessage, ParticipantId},
    queue::{OutboundQueue, Publisher},
    registry::{ConversationRegistry, Delivery},
    replacements::{ReplacementStore, Replacements},
    texts::Texts,
    transport::{Destination, Keyboard, Outbound, UpdateSource},
};

/// Pause after a failed fetch before trying again.
const FETCH_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Shared state of the running pipeline.
pub struct Intake {
    admin_chat_id: i64,
    publish_to: Destination,
    publish_interval: Duration,
    texts: Arc<Texts>,
    form: Form,
    registry: ConversationRegistry,
    replacements: Replacements,
    queue: Arc<OutboundQueue>,
    outbound: Arc<dyn Outbound>,
    shutdown: CancellationToken,
}

impl Intake {
    pub fn new(
        config: &IntakeConfig,
        outbound: Arc<dyn Outbound>,
        replacements: Replacements,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let texts = Arc::new(config.texts.clone());
        Arc::new(Self {
            admin_chat_id: config.admin_chat_id,
            publish_to: config.publish_to.clone(),
            publish_interval: config.publish_interval(),
            form: Form::new(Arc::clone(&texts), config.attachment_limits()),
            texts,
            registry: ConversationRegistry::new(),
            replacements,
            queue: Arc::new(OutboundQueue::new(config.drain_order)),
            outbound,
            shutdown,
        })
    }

    /// Build from config, loading the replacement table from disk.
    pub fn from_config(
        config: &IntakeConfig,
        outbound: Arc<dyn Outbound>,
        shutdown: CancellationToken,
    ) -> Result<Arc<Self>> {
        let replacements =
            Replacements::load(ReplacementStore::new(config.replacements_path.clone()))?;
        Ok(Self::new(config, outbound, replacements, shutdown))
    }

    pub fn registry(&self) -> &ConversationRegistry {
        &self.registry
    }

    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    pub fn replacements(&self) -> &Replacements {
        &self.replacements
    }

    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// The publisher draining this pipeline's queue.
    pub fn publisher(&self) -> Publisher {
        Publisher::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.outbound),
            self.publish_to.clone(),
            self.publish_interval,
        )
    }

    fn entry_keyboard(&self) -> Keyboard {
        Keyboard::single(self.texts.entry_button.as_str())
    }

    /// Spawn one handler per message. Start order among them is not defined.
    pub fn dispatch(self: &Arc<Self>, messages: Vec<LogicalMessage>) -> Vec<JoinHandle<()>> {
        messages
            .into_iter()
            .map(|message| {
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    let participant = message.sender;
                    let chat_id = message.chat_id;
                    if let Err(e) = this.handle(message).await {
                        this.report(participant, chat_id, e);
                    }
                })
            })
            .collect()
    }

    fn report(&self, participant: ParticipantId, chat_id: i64, e: Error) {
        if e.is_invariant_violation() {
            error!(%participant, chat_id, error = %e, "invariant violated, shutting down");
            self.shutdown.cancel();
        } else {
            error!(%participant, chat_id, error = %e, "failed to handle message");
        }
    }

    /// Route one logical message by chat class and conversation state.
    pub async fn handle(&self, message: LogicalMessage) -> Result<()> {
        match message.chat {
            ChatClass::Private => self.handle_private(message).await,
            ChatClass::Administrative => self.handle_admin(message).await,
            ChatClass::Other => {
                debug!(chat_id = message.chat_id, "message in a group chat");
                self.outbound
                    .send_text(
                        &Destination::Chat(message.chat_id),
                        &self.texts.not_for_groups,
                        None,
                    )
                    .await
            },
        }
    }

    async fn handle_private(&self, message: LogicalMessage) -> Result<()> {
        let participant = message.sender;
        let to = Destination::Chat(message.chat_id);
        let texts = &*self.texts;

        if self.registry.is_open(participant) {
            if message.is_text(&texts.cancel_button) {
                self.registry.cancel(participant);
                return self
                    .outbound
                    .send_text(&to, &texts.cancelled, Some(&self.entry_keyboard()))
                    .await;
            }
            if self.registry.deliver(participant, message) == Delivery::Discarded {
                debug!(%participant, "no step waiting, message dropped");
            }
            return Ok(());
        }

        if message.is_text("/start") {
            return self
                .outbound
                .send_text(&to, &texts.greeting, Some(&self.entry_keyboard()))
                .await;
        }

        if !message.is_text(&texts.entry_button) {
            return self
                .outbound
                .send_text(&to, &texts.press_button_to_start, Some(&self.entry_keyboard()))
                .await;
        }

        let Some(handle) = message.handle.as_deref().filter(|h| !h.is_empty()) else {
            info!(%participant, "participant has no public handle");
            return self.outbound.send_text(&to, &texts.no_handle, None).await;
        };
        let Some(ticket) = self.registry.open(participant) else {
            // Lost a race with another message that opened the conversation.
            self.registry.deliver(participant, message);
            return Ok(());
        };

        let engine = StepEngine {
            registry: &self.registry,
            outbound: &*self.outbound,
            replacements: &self.replacements,
            queue: &self.queue,
            form: &self.form,
        };
        engine.run(ticket, handle).await?;
        Ok(())
    }

    async fn handle_admin(&self, message: LogicalMessage) -> Result<()> {
        let Some(text) = message.text() else {
            return Ok(());
        };
        let reply = match admin::handle(text, &self.texts, &self.replacements).await {
            None => return Ok(()),
            Some(Ok(reply)) => reply,
            Some(Err(e)) => e.to_string(),
        };
        self.outbound
            .send_text(&Destination::Chat(message.chat_id), &reply, None)
            .await
    }

    /// Fetch, batch and dispatch until shutdown.
    ///
    /// Fetch errors are retried after a pause. A conflict with another
    /// consumer cancels the shutdown token and is returned.
    pub async fn run_polling(
        self: Arc<Self>,
        source: Arc<dyn UpdateSource>,
        poll_timeout: Duration,
    ) -> Result<()> {
        info!(admin_chat_id = self.admin_chat_id, "starting polling loop");
        let mut cursor: Option<i64> = None;

        loop {
            let fetched = tokio::select! {
                () = self.shutdown.cancelled() => break,
                fetched = source.fetch(cursor, poll_timeout) => fetched,
            };

            match fetched {
                Ok(events) => {
                    let cycle = ingest(events, self.admin_chat_id);
                    if cycle.next_cursor.is_some() {
                        cursor = cycle.next_cursor;
                    }
                    if !cycle.messages.is_empty() {
                        debug!(
                            count = cycle.messages.len(),
                            cursor = ?cursor,
                            "dispatching messages"
                        );
                    }
                    self.dispatch(cycle.messages);
                },
                Err(e @ Error::SourceConflict { .. }) => {
                    warn!(error = %e, "another consumer is fetching updates, stopping");
                    self.shutdown.cancel();
                    return Err(e);
                },
                Err(e) => {
                    warn!(error = %e, "fetching updates failed");
                    tokio::select! {
                        () = self.shutdown.cancelled() => break,
                        () = tokio::time::sleep(FETCH_RETRY_DELAY) => {},
                    }
                },
            }
        }

        info!("polling loop stopped");
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            message::{
                AttachmentRef, RawEvent, RawMessage,
                fixtures::private_text,
            },
            replacements::ReplacementTable,
            transport::mock::{RecordingOutbound, Sent},
        },
        async_trait::async_trait,
        std::{collections::VecDeque, sync::Mutex},
    };

    const ADMIN: i64 = -1001;
    const P: ParticipantId = ParticipantId(7);

    fn intake(outbound: Arc<RecordingOutbound>) -> Arc<Intake> {
        let config = IntakeConfig {
            admin_chat_id: ADMIN,
            publish_to: Destination::Channel("@market".into()),
            ..Default::default()
        };
        Intake::new(
            &config,
            outbound,
            Replacements::in_memory(ReplacementTable::default()),
            CancellationToken::new(),
        )
    }

    fn admin_text(text: &str) -> LogicalMessage {
        LogicalMessage {
            chat: ChatClass::Administrative,
            chat_id: ADMIN,
            ..private_text(1, text)
        }
    }

    async fn until(mut cond: impl FnMut() -> bool) {
        for _ in 0..10_000 {
            if cond() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition never held");
    }

    #[tokio::test]
    async fn start_sends_greeting_with_entry_button() {
        let out = Arc::new(RecordingOutbound::default());
        let i = intake(Arc::clone(&out));
        i.handle(private_text(P.0, "/start")).await.unwrap();

        let sent = out.sent();
        let Sent::Text { text, keyboard, .. } = &sent[0] else {
            panic!("expected text");
        };
        assert_eq!(text, &Texts::default().greeting);
        assert_eq!(keyboard.as_ref().unwrap().labels().collect::<Vec<_>>(), [
            "Offer an item"
        ]);
    }

    #[tokio::test]
    async fn other_private_text_asks_to_press_button() {
        let out = Arc::new(RecordingOutbound::default());
        let i = intake(Arc::clone(&out));
        i.handle(private_text(P.0, "hi")).await.unwrap();
        assert_eq!(
            out.last_text_to(&P.into()).unwrap(),
            Texts::default().press_button_to_start
        );
    }

    #[tokio::test]
    async fn entry_without_handle_never_starts_conversation() {
        let out = Arc::new(RecordingOutbound::default());
        let i = intake(Arc::clone(&out));
        let msg = LogicalMessage {
            handle: None,
            ..private_text(P.0, "Offer an item")
        };
        i.handle(msg).await.unwrap();
        assert_eq!(out.last_text_to(&P.into()).unwrap(), Texts::default().no_handle);
        assert!(!i.registry().is_open(P));
    }

    #[tokio::test]
    async fn group_chat_is_refused() {
        let out = Arc::new(RecordingOutbound::default());
        let i = intake(Arc::clone(&out));
        let msg = LogicalMessage {
            chat: ChatClass::Other,
            chat_id: -5,
            ..private_text(P.0, "hello")
        };
        i.handle(msg).await.unwrap();
        assert_eq!(
            out.last_text_to(&Destination::Chat(-5)).unwrap(),
            Texts::default().not_for_groups
        );
    }

    #[tokio::test]
    async fn admin_commands_are_answered_in_admin_chat() {
        let out = Arc::new(RecordingOutbound::default());
        let i = intake(Arc::clone(&out));
        let admin = Destination::Chat(ADMIN);

        i.handle(admin_text("/help")).await.unwrap();
        assert_eq!(out.last_text_to(&admin).unwrap(), Texts::default().help);

        i.handle(admin_text(r#"/replacements {"ipx":"iPX"}"#))
            .await
            .unwrap();
        assert_eq!(out.last_text_to(&admin).unwrap(), admin::SAVED);
        assert_eq!(i.replacements().normalize("IPX"), "iPX");

        i.handle(admin_text("/replacements nope")).await.unwrap();
        assert!(out.last_text_to(&admin).unwrap().starts_with("Error:"));

        let before = out.sent().len();
        i.handle(admin_text("just chatting")).await.unwrap();
        assert_eq!(out.sent().len(), before);
    }

    #[tokio::test]
    async fn cancel_button_ends_running_conversation() {
        let out = Arc::new(RecordingOutbound::default());
        let i = intake(Arc::clone(&out));

        let conversation = i.dispatch(vec![private_text(P.0, "Offer an item")]);
        until(|| i.registry().is_waiting(P)).await;
        assert_eq!(out.last_text_to(&P.into()).unwrap(), Texts::default().ask_name);

        i.handle(private_text(P.0, "Cancel")).await.unwrap();
        for task in conversation {
            task.await.unwrap();
        }
        assert!(!i.registry().is_open(P));
        assert_eq!(out.last_text_to(&P.into()).unwrap(), Texts::default().cancelled);
        assert!(i.queue().is_empty());
    }

    #[tokio::test]
    async fn messages_reach_the_waiting_step() {
        let out = Arc::new(RecordingOutbound::default());
        let i = intake(Arc::clone(&out));

        i.dispatch(vec![private_text(P.0, "Offer an item")]);
        until(|| i.registry().is_waiting(P)).await;
        i.handle(private_text(P.0, "Vape")).await.unwrap();
        until(|| {
            out.last_text_to(&P.into()).as_deref() == Some(Texts::default().ask_operability.as_str())
        })
        .await;

        // Another participant is unaffected.
        i.handle(private_text(8, "/start")).await.unwrap();
        assert!(!i.registry().is_open(ParticipantId(8)));
        i.registry().cancel(P);
    }

    #[tokio::test]
    async fn invariant_violation_cancels_shutdown() {
        let out = Arc::new(RecordingOutbound::default());
        let i = intake(out);
        i.report(P, P.0, Error::WaitAlreadyPending { participant: P });
        assert!(i.shutdown().is_cancelled());
    }

    #[tokio::test]
    async fn ordinary_failures_do_not_cancel_shutdown() {
        let out = Arc::new(RecordingOutbound {
            unavailable: vec![P.into()],
            ..Default::default()
        });
        let i = intake(out);
        for task in i.dispatch(vec![private_text(P.0, "/start")]) {
            task.await.unwrap();
        }
        assert!(!i.shutdown().is_cancelled());
    }

    /// Replays fixed batches, then reports a conflict.
    struct ScriptedSource {
        batches: Mutex<VecDeque<Result<Vec<RawEvent>>>>,
        cursors: Mutex<Vec<Option<i64>>>,
    }

    #[async_trait]
    impl UpdateSource for ScriptedSource {
        async fn fetch(&self, cursor: Option<i64>, _timeout: Duration) -> Result<Vec<RawEvent>> {
            self.cursors.lock().unwrap().push(cursor);
            self.batches
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::SourceConflict {
                    message: "terminated by other getUpdates request".into(),
                }))
        }
    }

    fn album_part(id: i64, file: &str) -> RawEvent {
        RawEvent {
            id,
            message: Some(RawMessage {
                chat_id: P.0,
                private: true,
                sender: P,
                handle: Some("user7".into()),
                attachment: Some(AttachmentRef::new(file)),
                batch_id: Some("album".into()),
                ..Default::default()
            }),
        }
    }

    fn text_event(id: i64, chat_id: i64, private: bool, text: &str) -> RawEvent {
        RawEvent {
            id,
            message: Some(RawMessage {
                chat_id,
                private,
                sender: P,
                handle: Some("user7".into()),
                text: Some(text.into()),
                ..Default::default()
            }),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn polling_batches_dispatches_and_stops_on_conflict() {
        let out = Arc::new(RecordingOutbound::default());
        let i = intake(Arc::clone(&out));
        let source = Arc::new(ScriptedSource {
            batches: Mutex::new(VecDeque::from([
                Ok(vec![
                    text_event(5, P.0, true, "/start"),
                    text_event(6, -5, false, "hi all"),
                ]),
                Err(Error::message("network down")),
                Ok(vec![RawEvent {
                    id: 9,
                    message: None,
                }]),
            ])),
            cursors: Mutex::new(Vec::new()),
        });

        let result = Arc::clone(&i)
            .run_polling(Arc::clone(&source) as Arc<dyn UpdateSource>, Duration::from_secs(30))
            .await;
        assert!(matches!(result, Err(Error::SourceConflict { .. })));
        assert!(i.shutdown().is_cancelled());
        assert_eq!(*source.cursors.lock().unwrap(), [
            None,
            Some(7),
            Some(7),
            Some(10)
        ]);

        until(|| out.sent().len() == 2).await;
        assert_eq!(
            out.last_text_to(&P.into()).unwrap(),
            Texts::default().greeting
        );
        assert_eq!(
            out.last_text_to(&Destination::Chat(-5)).unwrap(),
            Texts::default().not_for_groups
        );
    }

    #[tokio::test]
    async fn album_arrives_as_one_delivery() {
        let out = Arc::new(RecordingOutbound::default());
        let i = intake(Arc::clone(&out));
        let ticket = i.registry().open(P).unwrap();
        let wait = i.registry().begin_wait(&ticket).unwrap();

        let cycle = ingest(
            vec![album_part(1, "a"), album_part(2, "b"), album_part(3, "c")],
            ADMIN,
        );
        for task in i.dispatch(cycle.messages) {
            task.await.unwrap();
        }

        let delivered = wait.recv().await.unwrap();
        let files: Vec<_> = delivered.attachments.iter().map(AttachmentRef::as_str).collect();
        assert_eq!(files, ["a", "b", "c"]);
        assert_eq!(delivered.batch_id.as_deref(), Some("album"));
        assert_eq!(delivered.sender, P);
    }

    #[tokio::test]
    async fn shutdown_stops_idle_polling() {
        struct Never;

        #[async_trait]
        impl UpdateSource for Never {
            async fn fetch(&self, _: Option<i64>, _: Duration) -> Result<Vec<RawEvent>> {
                std::future::pending().await
            }
        }

        let i = intake(Arc::new(RecordingOutbound::default()));
        let task = tokio::spawn(
            Arc::clone(&i).run_polling(Arc::new(Never), Duration::from_secs(30)),
        );
        i.shutdown().cancel();
        assert!(task.await.unwrap().is_ok());
    }
}
