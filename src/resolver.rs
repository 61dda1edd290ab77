//! Thread-root resolution and continuation detection.
//!
//! Works on a protocol-neutral view of events so the walk is testable
//! without a homeserver; the Matrix adapter implements [`EventSource`].

use crate::error::MatrixError;
use async_trait::async_trait;

/// Upper bound on the reply-chain walk. The relation graph is acyclic in
/// practice, but an explicit cap turns a malformed chain into an error
/// instead of unbounded recursion.
const MAX_ROOT_DEPTH: usize = 32;

/// How an event relates to an earlier one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    /// An explicit thread relation; `root` anchors the thread.
    Thread { root: String },
    /// A plain rich reply to another event.
    Reply { to: String },
}

/// The slice of an event the resolver needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRef {
    pub event_id: String,
    pub sender: String,
    pub relation: Option<Relation>,
}

/// Fetches earlier events in a room by id.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetch an event, or None if it cannot be found.
    async fn fetch(&self, event_id: &str) -> Result<Option<EventRef>, MatrixError>;
}

/// Find the id of the event anchoring this event's conversation.
///
/// No relation: the event is its own root. A thread relation names the root
/// directly (one hop). A plain reply walks to its target and repeats; an
/// unfetchable target makes the current event the root, best effort.
pub async fn find_root(
    source: &dyn EventSource,
    event: &EventRef,
) -> Result<String, MatrixError> {
    let mut current = event.clone();
    for _ in 0..MAX_ROOT_DEPTH {
        match &current.relation {
            None => return Ok(current.event_id),
            Some(Relation::Thread { root }) => return Ok(root.clone()),
            Some(Relation::Reply { to }) => match source.fetch(to).await? {
                Some(previous) => current = previous,
                None => return Ok(current.event_id),
            },
        }
    }
    Err(MatrixError::RootResolutionFailed(format!(
        "reply chain from {} exceeds {} hops",
        event.event_id, MAX_ROOT_DEPTH
    )))
}

/// Whether an event should be treated as continuing a conversation.
///
/// Matrix auto-threads messages sent in a thread, so any thread relation
/// counts. A plain reply only counts when it targets one of the bot's own
/// messages; arbitrary third-party replies are left alone.
pub async fn is_continuation(
    source: &dyn EventSource,
    event: &EventRef,
    bot_user: &str,
) -> Result<bool, MatrixError> {
    match &event.relation {
        Some(Relation::Thread { .. }) => Ok(true),
        Some(Relation::Reply { to }) => Ok(source
            .fetch(to)
            .await?
            .is_some_and(|target| target.sender == bot_user)),
        None => Ok(false),
    }
}
