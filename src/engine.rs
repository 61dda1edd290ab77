//! Conversation engine: the per-event state machine.
//!
//! Each incoming event either dispatches a command, continues a saved
//! thread, or is ignored. All external effects go through [`RoomHandle`]
//! and [`CompletionApi`], injected at construction.

use crate::command::{self, Command};
use crate::conversation::ChatThread;
use crate::error::{LlmError, MatrixError};
use crate::llm::{CompletionApi, models};
use crate::prompts;
use crate::resolver::{self, EventSource};
use crate::store::ThreadStore;
use crate::{EventContent, ImageAttachment, InboundEvent};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// Room-scoped messaging capabilities the engine needs. Implemented by the
/// Matrix adapter; tests use recording fakes.
#[async_trait]
pub trait RoomHandle: EventSource {
    /// Send a markdown-formatted text message replying to `event` — as a
    /// threaded reply when `in_thread`, a plain rich reply otherwise.
    async fn send_text(
        &self,
        body: &str,
        event: &InboundEvent,
        in_thread: bool,
    ) -> Result<(), MatrixError>;

    /// Send image bytes as an attachment replying to `event`.
    async fn send_image(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        event: &InboundEvent,
    ) -> Result<(), MatrixError>;

    /// Add a reaction emoji to `event`.
    async fn react(&self, event: &InboundEvent, emoji: &str) -> Result<(), MatrixError>;

    /// Set or clear the bot's typing indicator.
    async fn set_typing(&self, typing: bool) -> Result<(), MatrixError>;

    /// Download the attachment's media, decrypting when the source is
    /// encrypted.
    async fn fetch_media(&self, attachment: &ImageAttachment) -> Result<Vec<u8>, MatrixError>;
}

/// Orchestrates parse → resolve → load/create → append → complete →
/// persist → reply.
pub struct Engine {
    llm: Arc<dyn CompletionApi>,
    store: Arc<ThreadStore>,
    bot_user: String,
}

impl Engine {
    pub fn new(llm: Arc<dyn CompletionApi>, store: Arc<ThreadStore>, bot_user: String) -> Self {
        Self {
            llm,
            store,
            bot_user,
        }
    }

    /// Handle one timeline event. Any error escaping here is caught by the
    /// caller's wrapper, logged, and answered with a generic error reply.
    pub async fn handle_event(
        &self,
        room: &dyn RoomHandle,
        event: &InboundEvent,
    ) -> crate::Result<()> {
        if event.sender == self.bot_user {
            return Ok(());
        }
        match &event.content {
            EventContent::Text(body) => self.handle_text(room, event, body).await,
            EventContent::Image(attachment) => {
                self.handle_image_continuation(room, event, attachment).await
            }
        }
    }

    async fn handle_text(
        &self,
        room: &dyn RoomHandle,
        event: &InboundEvent,
        body: &str,
    ) -> crate::Result<()> {
        // Comment marker: humans talking past the bot.
        if body.starts_with("//") {
            return Ok(());
        }

        let source: &dyn EventSource = room;
        let is_replying = event.relation.is_some();

        if command::is_command(body) && !is_replying {
            with_typing(room, self.dispatch_command(room, event, body)).await?;
        } else if resolver::is_continuation(source, &event.event_ref(), &self.bot_user).await? {
            self.continue_thread(room, event, body).await?;
        }

        if body.to_lowercase().starts_with("ping") {
            room.react(event, "🏓").await?;
            room.send_text("pong", event, false).await?;
        }
        Ok(())
    }

    async fn dispatch_command(
        &self,
        room: &dyn RoomHandle,
        event: &InboundEvent,
        body: &str,
    ) -> crate::Result<()> {
        let cmd = match command::parse(body) {
            Ok(cmd) => cmd,
            Err(error) => {
                tracing::debug!(%error, body, "command parse failed");
                room.send_text(prompts::HELP_MESSAGE, event, false).await?;
                return Ok(());
            }
        };
        tracing::debug!(?cmd, "parsed command");

        match cmd {
            Command::Chat { model, prompt } => {
                // A fresh command is its own thread root.
                let thread = ChatThread::new(model, prompt);
                let _guard = self.store.lock(&event.room_id, &event.event_id).await;
                self.complete_and_reply(room, event, &event.event_id, thread, true)
                    .await
            }
            Command::Image {
                model,
                prompt,
                size,
            } => self.generate_image_reply(room, event, &model, &prompt, size).await,
            Command::Pricing => {
                room.send_text(prompts::PRICING_MESSAGE, event, false).await?;
                Ok(())
            }
        }
    }

    /// Extend a saved thread with a user text turn. A continuation with no
    /// saved thread under its root is not ours; ignore it.
    async fn continue_thread(
        &self,
        room: &dyn RoomHandle,
        event: &InboundEvent,
        body: &str,
    ) -> crate::Result<()> {
        let source: &dyn EventSource = room;
        let root = resolver::find_root(source, &event.event_ref()).await?;
        let _guard = self.store.lock(&event.room_id, &root).await;
        let Some(thread) = self.store.get(&event.room_id, &root)? else {
            return Ok(());
        };
        let thread = thread.with_user_text(body);
        with_typing(
            room,
            self.complete_and_reply(room, event, &root, thread, event.in_thread()),
        )
        .await
    }

    /// Extend a saved thread with a user image turn, if the thread's model
    /// can see images.
    async fn handle_image_continuation(
        &self,
        room: &dyn RoomHandle,
        event: &InboundEvent,
        attachment: &ImageAttachment,
    ) -> crate::Result<()> {
        let source: &dyn EventSource = room;
        if event.relation.is_none()
            || !resolver::is_continuation(source, &event.event_ref(), &self.bot_user).await?
        {
            return Ok(());
        }
        let root = resolver::find_root(source, &event.event_ref()).await?;
        let _guard = self.store.lock(&event.room_id, &root).await;
        let Some(thread) = self.store.get(&event.room_id, &root)? else {
            return Ok(());
        };
        if thread.model != models::VISION {
            room.send_text(prompts::IMAGE_CAPABILITY_MESSAGE, event, false)
                .await?;
            return Ok(());
        }
        with_typing(room, async {
            let image = room.fetch_media(attachment).await?;
            let thread = thread.with_user_image(&image, &attachment.subtype);
            self.complete_and_reply(room, event, &root, thread, event.in_thread())
                .await
        })
        .await
    }

    /// Run the completion, persist the updated thread under the root key,
    /// and reply with the assistant's text.
    async fn complete_and_reply(
        &self,
        room: &dyn RoomHandle,
        event: &InboundEvent,
        root: &str,
        thread: ChatThread,
        in_thread: bool,
    ) -> crate::Result<()> {
        tracing::debug!(root, model = %thread.model, turns = thread.messages.len(), "requesting completion");
        let completion = self.llm.chat_completion(&thread).await?;

        let (updated, reply) = match completion.content {
            Some(content) => {
                let reply = format!("[{}] {content}", thread.model);
                (thread.with_assistant(content), reply)
            }
            None => (thread, prompts::EMPTY_RESPONSE_MESSAGE.to_owned()),
        };
        self.store.put(&event.room_id, root, &updated)?;
        room.send_text(&reply, event, in_thread).await?;
        Ok(())
    }

    /// Generate an image and attach it as a reply. Provider invalid-request
    /// failures surface the provider's message; anything else propagates.
    async fn generate_image_reply(
        &self,
        room: &dyn RoomHandle,
        event: &InboundEvent,
        model: &str,
        prompt: &str,
        size: command::ImageSize,
    ) -> crate::Result<()> {
        let url = match self.llm.generate_image(prompt, model, size).await {
            Ok(url) => url,
            Err(LlmError::InvalidRequest(message)) => {
                room.send_text(&message, event, false).await?;
                return Ok(());
            }
            Err(error) => return Err(error.into()),
        };
        tracing::debug!(%url, model, "image generated");
        let bytes = self.llm.download(&url).await?;
        let filename = image_filename(&url);
        room.send_image(&filename, bytes, event).await?;
        Ok(())
    }
}

/// Last path segment of the image URL, query string stripped.
fn image_filename(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("image.png")
        .to_owned()
}

/// Set the typing indicator around `fut`, always clearing it afterwards,
/// including when the operation fails.
async fn with_typing<T, F>(room: &dyn RoomHandle, fut: F) -> crate::Result<T>
where
    F: Future<Output = crate::Result<T>>,
{
    room.set_typing(true).await?;
    let result = fut.await;
    if let Err(error) = room.set_typing(false).await {
        tracing::warn!(%error, "failed to clear typing indicator");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ImageSize;
    use crate::llm::Completion;
    use crate::resolver::{EventRef, Relation};
    use matrix_sdk::ruma::events::room::MediaSource;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Records outgoing messages and serves scripted timeline events.
    #[derive(Default)]
    struct FakeRoom {
        events: HashMap<String, EventRef>,
        sent: Mutex<Vec<(String, bool)>>,
        images: Mutex<Vec<String>>,
        reactions: Mutex<Vec<String>>,
        typing: Mutex<Vec<bool>>,
    }

    impl FakeRoom {
        fn with_events(events: &[EventRef]) -> Self {
            Self {
                events: events
                    .iter()
                    .map(|e| (e.event_id.clone(), e.clone()))
                    .collect(),
                ..Self::default()
            }
        }

        fn sent(&self) -> Vec<(String, bool)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventSource for FakeRoom {
        async fn fetch(&self, event_id: &str) -> Result<Option<EventRef>, MatrixError> {
            Ok(self.events.get(event_id).cloned())
        }
    }

    #[async_trait]
    impl RoomHandle for FakeRoom {
        async fn send_text(
            &self,
            body: &str,
            _event: &InboundEvent,
            in_thread: bool,
        ) -> Result<(), MatrixError> {
            self.sent.lock().unwrap().push((body.to_owned(), in_thread));
            Ok(())
        }

        async fn send_image(
            &self,
            filename: &str,
            _bytes: Vec<u8>,
            _event: &InboundEvent,
        ) -> Result<(), MatrixError> {
            self.images.lock().unwrap().push(filename.to_owned());
            Ok(())
        }

        async fn react(&self, _event: &InboundEvent, emoji: &str) -> Result<(), MatrixError> {
            self.reactions.lock().unwrap().push(emoji.to_owned());
            Ok(())
        }

        async fn set_typing(&self, typing: bool) -> Result<(), MatrixError> {
            self.typing.lock().unwrap().push(typing);
            Ok(())
        }

        async fn fetch_media(
            &self,
            _attachment: &ImageAttachment,
        ) -> Result<Vec<u8>, MatrixError> {
            Ok(vec![0xff, 0xd8])
        }
    }

    /// Scripted completion backend.
    struct FakeLlm {
        reply: Option<String>,
        image_error: Option<String>,
    }

    impl FakeLlm {
        fn replying(text: &str) -> Self {
            Self {
                reply: Some(text.to_owned()),
                image_error: None,
            }
        }
    }

    #[async_trait]
    impl CompletionApi for FakeLlm {
        async fn chat_completion(&self, _thread: &ChatThread) -> Result<Completion, LlmError> {
            Ok(Completion {
                content: self.reply.clone(),
            })
        }

        async fn generate_image(
            &self,
            _prompt: &str,
            _model: &str,
            _size: ImageSize,
        ) -> Result<String, LlmError> {
            match &self.image_error {
                Some(message) => Err(LlmError::InvalidRequest(message.clone())),
                None => Ok("https://cdn.example.org/out/generated.png?sig=abc".to_owned()),
            }
        }

        async fn download(&self, _url: &str) -> Result<Vec<u8>, LlmError> {
            Ok(vec![1, 2, 3])
        }
    }

    fn engine_with(llm: FakeLlm) -> (Engine, Arc<ThreadStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ThreadStore::open(&dir.path().join("threads.redb")).unwrap());
        let engine = Engine::new(Arc::new(llm), store.clone(), "@bot:example.org".into());
        (engine, store, dir)
    }

    fn text_event(id: &str, sender: &str, body: &str, relation: Option<Relation>) -> InboundEvent {
        InboundEvent {
            event_id: id.to_owned(),
            room_id: "!room:example.org".to_owned(),
            sender: sender.to_owned(),
            relation,
            content: EventContent::Text(body.to_owned()),
        }
    }

    #[tokio::test]
    async fn chat_command_opens_thread_and_replies() {
        let (engine, store, _dir) = engine_with(FakeLlm::replying("certainly"));
        let room = FakeRoom::default();
        let event = text_event("$cmd", "@user:example.org", "!chat o hello", None);

        engine.handle_event(&room, &event).await.unwrap();

        // Reply is prefixed with the model and opens a thread.
        assert_eq!(room.sent(), vec![("[gpt-4o] certainly".to_owned(), true)]);
        // Thread persisted under the command's own event id.
        let saved = store.get("!room:example.org", "$cmd").unwrap().unwrap();
        assert_eq!(saved.model, "gpt-4o");
        assert_eq!(saved.messages.len(), 3);
        // Typing was set and cleared.
        assert_eq!(*room.typing.lock().unwrap(), vec![true, false]);
    }

    #[tokio::test]
    async fn parse_failure_sends_help() {
        let (engine, _store, _dir) = engine_with(FakeLlm::replying("unused"));
        let room = FakeRoom::default();
        let event = text_event("$cmd", "@user:example.org", "!chatter hi", None);

        engine.handle_event(&room, &event).await.unwrap();

        let sent = room.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.starts_with("Usage:"));
    }

    #[tokio::test]
    async fn pricing_command_replies_with_table() {
        let (engine, _store, _dir) = engine_with(FakeLlm::replying("unused"));
        let room = FakeRoom::default();
        let event = text_event("$cmd", "@user:example.org", "!pricing", None);

        engine.handle_event(&room, &event).await.unwrap();

        assert!(room.sent()[0].0.contains("Pricing per 1M tokens"));
    }

    #[tokio::test]
    async fn continuation_extends_saved_thread() {
        let (engine, store, _dir) = engine_with(FakeLlm::replying("more"));
        store
            .put(
                "!room:example.org",
                "$root",
                &ChatThread::new("gpt-3.5-turbo", "first"),
            )
            .unwrap();
        let room = FakeRoom::default();
        let event = text_event(
            "$reply",
            "@user:example.org",
            "second",
            Some(Relation::Thread {
                root: "$root".into(),
            }),
        );

        engine.handle_event(&room, &event).await.unwrap();

        assert_eq!(room.sent(), vec![("[gpt-3.5-turbo] more".to_owned(), true)]);
        let saved = store.get("!room:example.org", "$root").unwrap().unwrap();
        // system + user + user + assistant
        assert_eq!(saved.messages.len(), 4);
    }

    #[tokio::test]
    async fn continuation_without_saved_thread_is_a_noop() {
        let (engine, _store, _dir) = engine_with(FakeLlm::replying("unused"));
        let room = FakeRoom::default();
        let event = text_event(
            "$reply",
            "@user:example.org",
            "hello?",
            Some(Relation::Thread {
                root: "$unknown".into(),
            }),
        );

        engine.handle_event(&room, &event).await.unwrap();

        assert!(room.sent().is_empty());
    }

    #[tokio::test]
    async fn third_party_reply_is_ignored() {
        let (engine, store, _dir) = engine_with(FakeLlm::replying("unused"));
        store
            .put(
                "!room:example.org",
                "$theirs",
                &ChatThread::new("gpt-3.5-turbo", "x"),
            )
            .unwrap();
        let room = FakeRoom::with_events(&[EventRef {
            event_id: "$theirs".into(),
            sender: "@other:example.org".into(),
            relation: None,
        }]);
        let event = text_event(
            "$reply",
            "@user:example.org",
            "not for the bot",
            Some(Relation::Reply {
                to: "$theirs".into(),
            }),
        );

        engine.handle_event(&room, &event).await.unwrap();

        assert!(room.sent().is_empty());
    }

    #[tokio::test]
    async fn comment_marker_and_own_messages_are_ignored() {
        let (engine, _store, _dir) = engine_with(FakeLlm::replying("unused"));
        let room = FakeRoom::default();

        let comment = text_event("$a", "@user:example.org", "// !chat hi", None);
        engine.handle_event(&room, &comment).await.unwrap();

        let own = text_event("$b", "@bot:example.org", "!chat hi", None);
        engine.handle_event(&room, &own).await.unwrap();

        assert!(room.sent().is_empty());
    }

    #[tokio::test]
    async fn empty_completion_replies_placeholder() {
        let (engine, store, _dir) = engine_with(FakeLlm {
            reply: None,
            image_error: None,
        });
        let room = FakeRoom::default();
        let event = text_event("$cmd", "@user:example.org", "!chat hi", None);

        engine.handle_event(&room, &event).await.unwrap();

        assert_eq!(room.sent(), vec![("Empty response".to_owned(), true)]);
        // No assistant turn was persisted.
        let saved = store.get("!room:example.org", "$cmd").unwrap().unwrap();
        assert_eq!(saved.messages.len(), 2);
    }

    #[tokio::test]
    async fn image_command_attaches_generated_image() {
        let (engine, _store, _dir) = engine_with(FakeLlm::replying("unused"));
        let room = FakeRoom::default();
        let event = text_event("$cmd", "@user:example.org", "!image 3 a cat", None);

        engine.handle_event(&room, &event).await.unwrap();

        assert_eq!(*room.images.lock().unwrap(), vec!["generated.png"]);
    }

    #[tokio::test]
    async fn image_invalid_request_relays_provider_message() {
        let (engine, _store, _dir) = engine_with(FakeLlm {
            reply: None,
            image_error: Some("Your prompt was rejected".to_owned()),
        });
        let room = FakeRoom::default();
        let event = text_event("$cmd", "@user:example.org", "!image a cat", None);

        engine.handle_event(&room, &event).await.unwrap();

        assert_eq!(
            room.sent(),
            vec![("Your prompt was rejected".to_owned(), false)]
        );
        assert!(room.images.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn image_continuation_requires_vision_model() {
        let (engine, store, _dir) = engine_with(FakeLlm::replying("unused"));
        store
            .put(
                "!room:example.org",
                "$root",
                &ChatThread::new("gpt-3.5-turbo", "x"),
            )
            .unwrap();
        let room = FakeRoom::default();
        let event = InboundEvent {
            event_id: "$img".into(),
            room_id: "!room:example.org".into(),
            sender: "@user:example.org".into(),
            relation: Some(Relation::Thread {
                root: "$root".into(),
            }),
            content: EventContent::Image(ImageAttachment {
                filename: "photo.jpg".into(),
                subtype: "jpeg".into(),
                source: MediaSource::Plain("mxc://example.org/abc".into()),
            }),
        };

        engine.handle_event(&room, &event).await.unwrap();

        assert_eq!(
            room.sent(),
            vec![("Only gpt-4o supports images".to_owned(), false)]
        );
    }

    #[tokio::test]
    async fn image_continuation_appends_user_image_turn() {
        let (engine, store, _dir) = engine_with(FakeLlm::replying("I see a cat"));
        store
            .put("!room:example.org", "$root", &ChatThread::new("gpt-4o", "x"))
            .unwrap();
        let room = FakeRoom::default();
        let event = InboundEvent {
            event_id: "$img".into(),
            room_id: "!room:example.org".into(),
            sender: "@user:example.org".into(),
            relation: Some(Relation::Thread {
                root: "$root".into(),
            }),
            content: EventContent::Image(ImageAttachment {
                filename: "photo.jpg".into(),
                subtype: "jpeg".into(),
                source: MediaSource::Plain("mxc://example.org/abc".into()),
            }),
        };

        engine.handle_event(&room, &event).await.unwrap();

        assert_eq!(room.sent(), vec![("[gpt-4o] I see a cat".to_owned(), true)]);
        let saved = store.get("!room:example.org", "$root").unwrap().unwrap();
        assert_eq!(saved.messages.len(), 4);
    }

    #[tokio::test]
    async fn ping_gets_reaction_and_pong() {
        let (engine, _store, _dir) = engine_with(FakeLlm::replying("unused"));
        let room = FakeRoom::default();
        let event = text_event("$p", "@user:example.org", "Ping everyone", None);

        engine.handle_event(&room, &event).await.unwrap();

        assert_eq!(*room.reactions.lock().unwrap(), vec!["🏓"]);
        assert_eq!(room.sent(), vec![("pong".to_owned(), false)]);
    }

    #[test]
    fn image_filename_strips_query() {
        assert_eq!(
            image_filename("https://cdn.example.org/a/b/cat.png?sig=1"),
            "cat.png"
        );
        assert_eq!(image_filename("https://cdn.example.org/"), "image.png");
    }
}
