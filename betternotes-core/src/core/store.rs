//! The local persistent store contract and an in-memory implementation.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::core::note::{Collection, Note};
use crate::{NotesError, Result};

/// A transactional key-value store of notes, keyed by note id.
///
/// Each call is atomic. The store is a disposable projection of server state;
/// [`replace_all`](LocalStore::replace_all) overwrites a collection wholesale
/// after every successful sync.
pub trait LocalStore: Send + Sync {
    /// Every note in `collection`, in no particular order.
    fn get_all(&self, collection: Collection) -> Result<Vec<Note>>;

    /// Inserts or replaces `notes` by id.
    fn put_all(&self, collection: Collection, notes: &[Note]) -> Result<()>;

    /// Removes one note; missing ids are not an error.
    fn delete(&self, collection: Collection, id: &str) -> Result<()>;

    /// Removes every note in `collection`.
    fn clear(&self, collection: Collection) -> Result<()>;

    /// Clears `collection` and inserts `notes`.
    ///
    /// The default runs two separate calls; implementations with transactions
    /// should override it to make the replacement atomic.
    fn replace_all(&self, collection: Collection, notes: &[Note]) -> Result<()> {
        self.clear(collection)?;
        self.put_all(collection, notes)
    }

    /// Epoch millis of the last successful sync, or `None` if never synced.
    fn last_sync_time(&self, collection: Collection) -> Result<Option<i64>>;

    fn set_last_sync_time(&self, collection: Collection, millis: i64) -> Result<()>;
}

#[derive(Default)]
struct MemoryTables {
    active: HashMap<String, Note>,
    deleted: HashMap<String, Note>,
    sync_meta: HashMap<&'static str, i64>,
}

impl MemoryTables {
    fn table(&mut self, collection: Collection) -> &mut HashMap<String, Note> {
        match collection {
            Collection::Active => &mut self.active,
            Collection::Deleted => &mut self.deleted,
        }
    }
}

/// A [`LocalStore`] held entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<MemoryTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryTables>> {
        self.tables
            .lock()
            .map_err(|_| NotesError::InvalidCache("memory store lock poisoned".to_string()))
    }
}

impl LocalStore for MemoryStore {
    fn get_all(&self, collection: Collection) -> Result<Vec<Note>> {
        Ok(self.lock()?.table(collection).values().cloned().collect())
    }

    fn put_all(&self, collection: Collection, notes: &[Note]) -> Result<()> {
        let mut tables = self.lock()?;
        let table = tables.table(collection);
        for note in notes {
            table.insert(note.id.clone(), note.clone());
        }
        Ok(())
    }

    fn delete(&self, collection: Collection, id: &str) -> Result<()> {
        self.lock()?.table(collection).remove(id);
        Ok(())
    }

    fn clear(&self, collection: Collection) -> Result<()> {
        self.lock()?.table(collection).clear();
        Ok(())
    }

    fn replace_all(&self, collection: Collection, notes: &[Note]) -> Result<()> {
        let mut tables = self.lock()?;
        let table = tables.table(collection);
        table.clear();
        for note in notes {
            table.insert(note.id.clone(), note.clone());
        }
        Ok(())
    }

    fn last_sync_time(&self, collection: Collection) -> Result<Option<i64>> {
        Ok(self.lock()?.sync_meta.get(collection.sync_key()).copied())
    }

    fn set_last_sync_time(&self, collection: Collection, millis: i64) -> Result<()> {
        self.lock()?.sync_meta.insert(collection.sync_key(), millis);
        Ok(())
    }
}
