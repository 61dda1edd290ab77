//! Thread persistence: a redb-backed key-value store of [`ChatThread`]s.

use crate::conversation::ChatThread;
use crate::error::StoreError;
use dashmap::DashMap;
use redb::{Database, TableDefinition};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

const THREADS: TableDefinition<&str, &[u8]> = TableDefinition::new("threads");

/// Persists conversation threads keyed by (room id, thread-root event id).
///
/// Writes are last-write-wins. The source this replaces let concurrent
/// handlers race on the same key; [`ThreadStore::lock`] adds per-key
/// serialization so a load-complete-persist cycle holds the key exclusively.
pub struct ThreadStore {
    db: Database,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ThreadStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = Database::create(path)?;
        // Ensure the table exists so first reads don't special-case it.
        let tx = db.begin_write()?;
        tx.open_table(THREADS)?;
        tx.commit()?;
        Ok(Self {
            db,
            locks: DashMap::new(),
        })
    }

    /// Load the thread stored under (room, root), if any.
    pub fn get(&self, room: &str, root: &str) -> Result<Option<ChatThread>, StoreError> {
        let key = thread_key(room, root);
        let tx = self.db.begin_read()?;
        let table = tx.open_table(THREADS)?;
        let Some(value) = table.get(key.as_str())? else {
            return Ok(None);
        };
        let thread = serde_json::from_slice(value.value()).map_err(StoreError::Decode)?;
        Ok(Some(thread))
    }

    /// Store the thread under (room, root), replacing any previous value.
    pub fn put(&self, room: &str, root: &str, thread: &ChatThread) -> Result<(), StoreError> {
        let key = thread_key(room, root);
        let encoded = serde_json::to_vec(thread).map_err(StoreError::Encode)?;
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(THREADS)?;
            table.insert(key.as_str(), encoded.as_slice())?;
        }
        tx.commit()?;
        tracing::debug!(room, root, messages = thread.messages.len(), "thread saved");
        Ok(())
    }

    /// Acquire the per-key mutex for (room, root).
    ///
    /// Callers hold the guard across their whole read-modify-write so two
    /// replies into the same thread cannot interleave. Lock entries are
    /// never dropped; one `Arc<Mutex>` per active thread key is negligible.
    pub async fn lock(&self, room: &str, root: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(thread_key(room, root))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}

/// Composite key: room id and root event id concatenated, same shape the
/// stored records have always used.
fn thread_key(room: &str, root: &str) -> String {
    format!("{room}{root}")
}
