//! Threadbot: a Matrix bot that relays conversation threads to OpenAI.
//!
//! Commands open a thread (`!chat`, `!image`, `!pricing`); replies within a
//! thread continue the same conversation, with history persisted per thread
//! root.

pub mod command;
pub mod config;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod llm;
pub mod matrix;
pub mod prompts;
pub mod resolver;
pub mod store;

pub use error::{Error, Result};

use matrix_sdk::ruma::events::room::MediaSource;
use resolver::{EventRef, Relation};

/// A timeline event projected into what the engine needs.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub event_id: String,
    pub room_id: String,
    pub sender: String,
    pub relation: Option<Relation>,
    pub content: EventContent,
}

impl InboundEvent {
    /// The resolver's view of this event.
    pub fn event_ref(&self) -> EventRef {
        EventRef {
            event_id: self.event_id.clone(),
            sender: self.sender.clone(),
            relation: self.relation.clone(),
        }
    }

    /// Whether this event carries an explicit thread relation.
    pub fn in_thread(&self) -> bool {
        matches!(self.relation, Some(Relation::Thread { .. }))
    }
}

/// Message content variants the bot reacts to.
#[derive(Debug, Clone)]
pub enum EventContent {
    Text(String),
    Image(ImageAttachment),
}

/// An image attachment on an incoming event.
#[derive(Debug, Clone)]
pub struct ImageAttachment {
    pub filename: String,
    /// MIME subtype, the `png` in `image/png`.
    pub subtype: String,
    /// Media source handle; the adapter resolves (and decrypts) it.
    pub source: MediaSource,
}
