//! [`LocalStore`] implementation over the SQLite [`Storage`].

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Transaction};

use crate::core::note::{Collection, Note};
use crate::core::storage::Storage;
use crate::core::store::LocalStore;
use crate::{NotesError, Result};

/// The offline note cache. Every trait call runs in its own transaction.
pub struct NoteCache {
    storage: Mutex<Storage>,
}

impl NoteCache {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage: Mutex::new(storage),
        }
    }

    /// Opens (or creates) the cache file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`NotesError::InvalidCache`] if the file exists but is not a
    /// cache database, or [`NotesError::Database`] for any SQLite failure.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(Storage::open_or_create(path)?))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Storage>> {
        self.storage
            .lock()
            .map_err(|_| NotesError::InvalidCache("cache connection lock poisoned".to_string()))
    }
}

fn insert_notes(tx: &Transaction, collection: Collection, notes: &[Note]) -> Result<()> {
    for note in notes {
        let json = serde_json::to_string(note)?;
        let updated_at = note.updated_at.timestamp_millis();
        match collection {
            Collection::Active => {
                tx.execute(
                    "INSERT OR REPLACE INTO notes (id, updated_at, note_json) VALUES (?1, ?2, ?3)",
                    params![note.id, updated_at, json],
                )?;
            }
            Collection::Deleted => {
                tx.execute(
                    "INSERT OR REPLACE INTO deleted_notes (id, updated_at, deleted_at, note_json)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        note.id,
                        updated_at,
                        note.deleted_at.map(|ts| ts.timestamp_millis()),
                        json
                    ],
                )?;
            }
        }
    }
    Ok(())
}

impl LocalStore for NoteCache {
    fn get_all(&self, collection: Collection) -> Result<Vec<Note>> {
        let storage = self.lock()?;
        let order = match collection {
            Collection::Active => "updated_at DESC",
            Collection::Deleted => "deleted_at DESC, updated_at DESC",
        };
        let mut stmt = storage.connection().prepare(&format!(
            "SELECT note_json FROM {} ORDER BY {order}",
            collection.table()
        ))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(NotesError::from))
            .collect()
    }

    fn put_all(&self, collection: Collection, notes: &[Note]) -> Result<()> {
        let mut storage = self.lock()?;
        let tx = storage.connection_mut().transaction()?;
        insert_notes(&tx, collection, notes)?;
        tx.commit()?;
        Ok(())
    }

    fn delete(&self, collection: Collection, id: &str) -> Result<()> {
        let storage = self.lock()?;
        storage.connection().execute(
            &format!("DELETE FROM {} WHERE id = ?1", collection.table()),
            [id],
        )?;
        Ok(())
    }

    fn clear(&self, collection: Collection) -> Result<()> {
        let storage = self.lock()?;
        storage
            .connection()
            .execute(&format!("DELETE FROM {}", collection.table()), [])?;
        Ok(())
    }

    fn replace_all(&self, collection: Collection, notes: &[Note]) -> Result<()> {
        let mut storage = self.lock()?;
        let tx = storage.connection_mut().transaction()?;
        tx.execute(&format!("DELETE FROM {}", collection.table()), [])?;
        insert_notes(&tx, collection, notes)?;
        tx.commit()?;
        Ok(())
    }

    fn last_sync_time(&self, collection: Collection) -> Result<Option<i64>> {
        let storage = self.lock()?;
        let result = storage.connection().query_row(
            "SELECT last_sync_time FROM sync_meta WHERE key = ?1",
            [collection.sync_key()],
            |row| row.get::<_, i64>(0),
        );
        match result {
            Ok(millis) => Ok(Some(millis)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_last_sync_time(&self, collection: Collection, millis: i64) -> Result<()> {
        let storage = self.lock()?;
        storage.connection().execute(
            "INSERT OR REPLACE INTO sync_meta (key, last_sync_time) VALUES (?1, ?2)",
            params![collection.sync_key(), millis],
        )?;
        Ok(())
    }
}
