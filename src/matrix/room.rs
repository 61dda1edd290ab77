//! Room handle: the engine's messaging capabilities over a Matrix room.

use crate::engine::RoomHandle;
use crate::error::MatrixError;
use crate::resolver::{self, EventRef, EventSource};
use crate::{ImageAttachment, InboundEvent};
use anyhow::Context as _;
use async_trait::async_trait;
use matrix_sdk::attachment::AttachmentConfig;
use matrix_sdk::media::{MediaFormat, MediaRequestParameters};
use matrix_sdk::room::Room;
use matrix_sdk::room::reply::{EnforceThread, Reply};
use matrix_sdk::ruma::EventId;
use matrix_sdk::ruma::events::reaction::ReactionEventContent;
use matrix_sdk::ruma::events::relation::{Annotation, InReplyTo, Thread};
use matrix_sdk::ruma::events::room::message::{Relation, RoomMessageEventContent};
use matrix_sdk::ruma::events::{
    AnySyncMessageLikeEvent, AnySyncTimelineEvent, SyncMessageLikeEvent,
};

/// A Matrix room as seen by the engine.
pub struct MatrixRoom {
    room: Room,
}

impl MatrixRoom {
    pub fn new(room: Room) -> Self {
        Self { room }
    }
}

/// Project a ruma message relation into the resolver's view. Replacements
/// are walked like replies; unknown relation kinds resolve to nothing.
pub fn project_relation<C>(relation: &Relation<C>) -> Option<resolver::Relation> {
    match relation {
        Relation::Thread(thread) => Some(resolver::Relation::Thread {
            root: thread.event_id.to_string(),
        }),
        Relation::Reply { in_reply_to } => Some(resolver::Relation::Reply {
            to: in_reply_to.event_id.to_string(),
        }),
        Relation::Replacement(replacement) => Some(resolver::Relation::Reply {
            to: replacement.event_id.to_string(),
        }),
        _ => None,
    }
}

#[async_trait]
impl EventSource for MatrixRoom {
    async fn fetch(&self, event_id: &str) -> Result<Option<EventRef>, MatrixError> {
        let event_id = EventId::parse(event_id)
            .with_context(|| format!("invalid event id {event_id}"))
            .map_err(MatrixError::Other)?;
        let event = match self.room.event(&event_id, None).await {
            Ok(event) => event,
            Err(error) => {
                tracing::debug!(%error, %event_id, "event fetch failed");
                return Ok(None);
            }
        };
        let Ok(AnySyncTimelineEvent::MessageLike(AnySyncMessageLikeEvent::RoomMessage(
            SyncMessageLikeEvent::Original(message),
        ))) = event.raw().deserialize()
        else {
            return Ok(None);
        };
        Ok(Some(EventRef {
            event_id: message.event_id.to_string(),
            sender: message.sender.to_string(),
            relation: message.content.relates_to.as_ref().and_then(project_relation),
        }))
    }
}

#[async_trait]
impl RoomHandle for MatrixRoom {
    async fn send_text(
        &self,
        body: &str,
        event: &InboundEvent,
        in_thread: bool,
    ) -> Result<(), MatrixError> {
        let reply_to = EventId::parse(&event.event_id)
            .with_context(|| format!("invalid event id {}", event.event_id))
            .map_err(MatrixError::Other)?;

        let mut content = RoomMessageEventContent::text_markdown(body);
        content.relates_to = Some(if in_thread {
            // Thread off the event's existing root, or open a new thread
            // anchored at the event itself.
            let root = match &event.relation {
                Some(resolver::Relation::Thread { root }) => EventId::parse(root)
                    .with_context(|| format!("invalid thread root {root}"))
                    .map_err(MatrixError::Other)?,
                _ => reply_to.clone(),
            };
            Relation::Thread(Thread::plain(root, reply_to))
        } else {
            Relation::Reply {
                in_reply_to: InReplyTo::new(reply_to),
            }
        });

        self.room.send(content).await?;
        Ok(())
    }

    async fn send_image(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        event: &InboundEvent,
    ) -> Result<(), MatrixError> {
        let reply_to = EventId::parse(&event.event_id)
            .with_context(|| format!("invalid event id {}", event.event_id))
            .map_err(MatrixError::Other)?;
        let mime = mime_guess::from_path(filename).first_or(mime::IMAGE_PNG);
        let config = AttachmentConfig::new().reply(Some(Reply {
            event_id: reply_to,
            enforce_thread: EnforceThread::Unthreaded,
        }));
        self.room
            .send_attachment(filename, &mime, bytes, config)
            .await?;
        Ok(())
    }

    async fn react(&self, event: &InboundEvent, emoji: &str) -> Result<(), MatrixError> {
        let event_id = EventId::parse(&event.event_id)
            .with_context(|| format!("invalid event id {}", event.event_id))
            .map_err(MatrixError::Other)?;
        self.room
            .send(ReactionEventContent::new(Annotation::new(
                event_id,
                emoji.to_owned(),
            )))
            .await?;
        Ok(())
    }

    async fn set_typing(&self, typing: bool) -> Result<(), MatrixError> {
        self.room.typing_notice(typing).await?;
        Ok(())
    }

    async fn fetch_media(&self, attachment: &ImageAttachment) -> Result<Vec<u8>, MatrixError> {
        let request = MediaRequestParameters {
            source: attachment.source.clone(),
            format: MediaFormat::File,
        };
        self.room
            .client()
            .media()
            .get_media_content(&request, true)
            .await
            .map_err(|error| MatrixError::Media(error.to_string()))
    }
}
