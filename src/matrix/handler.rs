//! Bridges the Matrix sync stream into the conversation engine.

use crate::engine::{Engine, RoomHandle as _};
use crate::matrix::room::{MatrixRoom, project_relation};
use crate::prompts::INTERNAL_ERROR_MESSAGE;
use crate::{EventContent, ImageAttachment, InboundEvent};
use matrix_sdk::Client;
use matrix_sdk::room::Room;
use matrix_sdk::ruma::events::room::message::{MessageType, OriginalSyncRoomMessageEvent};
use std::path::Path;
use std::sync::Arc;

/// Register the room-message handler. One task is spawned per event; any
/// error escaping the engine is logged and answered with a generic error
/// reply so the sync stream is never disturbed.
pub fn register(client: &Client, engine: Arc<Engine>) {
    client.add_event_handler(
        move |ev: OriginalSyncRoomMessageEvent, room: Room, client: Client| {
            let engine = engine.clone();
            async move {
                let Some(own_id) = client.user_id() else {
                    return;
                };
                if ev.sender == own_id {
                    return;
                }
                let Some(inbound) = project_event(&ev, &room) else {
                    return;
                };
                tracing::debug!(
                    room_id = %inbound.room_id,
                    event_id = %inbound.event_id,
                    sender = %inbound.sender,
                    "incoming message"
                );
                let handle = MatrixRoom::new(room);
                tokio::spawn(async move {
                    if let Err(error) = engine.handle_event(&handle, &inbound).await {
                        tracing::error!(
                            %error,
                            event_id = %inbound.event_id,
                            "error handling message"
                        );
                        if let Err(error) = handle
                            .send_text(INTERNAL_ERROR_MESSAGE, &inbound, false)
                            .await
                        {
                            tracing::error!(%error, "failed to send internal error reply");
                        }
                    }
                });
            }
        },
    );
}

/// Project an SDK event into the engine's view. Message types the bot does
/// not react to project to None.
fn project_event(ev: &OriginalSyncRoomMessageEvent, room: &Room) -> Option<InboundEvent> {
    let relation = ev.content.relates_to.as_ref().and_then(project_relation);
    let content = match &ev.content.msgtype {
        MessageType::Text(text) => EventContent::Text(text.body.clone()),
        MessageType::Image(image) => {
            let filename = image.filename.clone().unwrap_or_else(|| image.body.clone());
            let subtype = image
                .info
                .as_ref()
                .and_then(|info| info.mimetype.as_deref())
                .and_then(|mime| mime.strip_prefix("image/"))
                .map(str::to_owned)
                .unwrap_or_else(|| extension_of(&filename));
            EventContent::Image(ImageAttachment {
                filename,
                subtype,
                source: image.source.clone(),
            })
        }
        _ => return None,
    };
    Some(InboundEvent {
        event_id: ev.event_id.to_string(),
        room_id: room.room_id().to_string(),
        sender: ev.sender.to_string(),
        relation,
        content,
    })
}

fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("png")
        .to_owned()
}
