//! The offline-first sync engine.
//!
//! Each [`Collection`] is served from the local store first and then
//! reconciled against the remote API. A successful fetch replaces both the
//! in-memory view and the local store wholesale (last write wins). Mutations
//! are optimistic: local state changes before the remote call, and a failed
//! call triggers a full re-sync of the affected collections.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};

use chrono::Utc;
use uuid::Uuid;

use crate::core::debounce::CancelToken;
use crate::core::link_preview::LinkPreviewData;
use crate::core::note::{Collection, NewNote, Note, NoteUpdate};
use crate::core::remote::NoteApi;
use crate::core::settings::ClientSettings;
use crate::core::store::LocalStore;
use crate::{NotesError, Result};

pub const WELCOME_TITLE: &str = "Welcome to Better Notes";

pub const WELCOME_CONTENT: &str = "Start typing to create your first note...\n\nFeatures:\n\
• Smooth typing experience\n• Ctrl+V to paste images\n• Code blocks with syntax highlighting\n\
• Beautiful light and dark themes";

/// Engine behaviour that is not part of the store or API contracts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Create a welcome note when mounting finds no active notes remotely.
    pub seed_welcome_note: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed_welcome_note: true,
        }
    }
}

impl From<&ClientSettings> for EngineConfig {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            seed_welcome_note: settings.seed_welcome_note,
        }
    }
}

/// Where a collection is in its load/sync lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Nothing loaded yet.
    Empty,
    /// Cached notes are visible; no sync has completed.
    CacheLoaded,
    /// A remote fetch is in flight.
    Syncing,
    /// The last fetch succeeded.
    Synced,
}

/// Result of one sync attempt. Failures are absorbed, never raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced { count: usize },
    /// Another sync of the same collection was already running.
    AlreadyInFlight,
    /// The remote fetch failed; cache and state were left untouched.
    Failed,
    /// The token was cancelled before the result was applied.
    Cancelled,
}

struct CollectionState {
    notes: Vec<Note>,
    phase: SyncPhase,
}

struct Lane {
    state: RwLock<CollectionState>,
    in_flight: AtomicBool,
}

impl Lane {
    fn new() -> Self {
        Self {
            state: RwLock::new(CollectionState {
                notes: Vec::new(),
                phase: SyncPhase::Empty,
            }),
            in_flight: AtomicBool::new(false),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, CollectionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CollectionState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the single-flight flag when a sync finishes, however it finishes.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Serves notes from a [`LocalStore`] and keeps them in sync with a [`NoteApi`].
///
/// The engine is `Send + Sync`; share it through an [`Arc`].
pub struct SyncEngine<S: LocalStore, A: NoteApi> {
    store: S,
    api: A,
    config: EngineConfig,
    active: Lane,
    deleted: Lane,
}

impl<S: LocalStore, A: NoteApi> SyncEngine<S, A> {
    pub fn new(store: S, api: A) -> Self {
        Self::with_config(store, api, EngineConfig::default())
    }

    pub fn with_config(store: S, api: A, config: EngineConfig) -> Self {
        Self {
            store,
            api,
            config,
            active: Lane::new(),
            deleted: Lane::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn lane(&self, collection: Collection) -> &Lane {
        match collection {
            Collection::Active => &self.active,
            Collection::Deleted => &self.deleted,
        }
    }

    // ── Queries ─────────────────────────────────────────────────

    /// The visible notes of `collection`, in display order.
    pub fn notes(&self, collection: Collection) -> Vec<Note> {
        self.lane(collection).read().notes.clone()
    }

    /// Looks a note up in the active set, then in the recycle bin.
    pub fn note(&self, id: &str) -> Option<Note> {
        self.find(Collection::Active, id)
            .or_else(|| self.find(Collection::Deleted, id))
    }

    fn find(&self, collection: Collection, id: &str) -> Option<Note> {
        self.lane(collection)
            .read()
            .notes
            .iter()
            .find(|n| n.id == id)
            .cloned()
    }

    pub fn phase(&self, collection: Collection) -> SyncPhase {
        self.lane(collection).read().phase
    }

    /// Active notes whose title or content contains `query`, ignoring case.
    pub fn search(&self, query: &str) -> Vec<Note> {
        self.active
            .read()
            .notes
            .iter()
            .filter(|n| n.matches(query))
            .cloned()
            .collect()
    }

    /// Epoch millis of the last successful sync of `collection`.
    pub fn last_sync_time(&self, collection: Collection) -> Option<i64> {
        self.store.last_sync_time(collection).unwrap_or_else(|e| {
            log::warn!("Failed to read last sync time for {}: {e}", collection.sync_key());
            None
        })
    }

    // ── Load & sync ─────────────────────────────────────────────

    /// Makes cached notes visible before any network traffic.
    ///
    /// Only applies while the collection is still [`SyncPhase::Empty`]. A
    /// store failure is logged and leaves the collection empty. Returns the
    /// number of notes loaded.
    pub fn load_cached(&self, collection: Collection) -> usize {
        let mut notes = match self.store.get_all(collection) {
            Ok(notes) => notes,
            Err(e) => {
                log::warn!("Offline cache unavailable for {}: {e}", collection.sync_key());
                return 0;
            }
        };
        if notes.is_empty() {
            return 0;
        }
        collection.sort(&mut notes);
        let mut state = self.lane(collection).write();
        if state.phase != SyncPhase::Empty {
            return 0;
        }
        let count = notes.len();
        state.notes = notes;
        state.phase = SyncPhase::CacheLoaded;
        log::debug!("Loaded {count} cached notes for {}", collection.sync_key());
        count
    }

    pub fn sync(&self, collection: Collection) -> SyncOutcome {
        self.sync_with(collection, &CancelToken::new())
    }

    /// Fetches `collection` and, on success, replaces state and cache.
    ///
    /// At most one sync per collection runs at a time; a concurrent call
    /// returns [`SyncOutcome::AlreadyInFlight`] without touching the API.
    pub fn sync_with(&self, collection: Collection, token: &CancelToken) -> SyncOutcome {
        let lane = self.lane(collection);
        let Some(_guard) = InFlight::acquire(&lane.in_flight) else {
            log::debug!("Sync of {} already in flight", collection.sync_key());
            return SyncOutcome::AlreadyInFlight;
        };

        let previous = {
            let mut state = lane.write();
            std::mem::replace(&mut state.phase, SyncPhase::Syncing)
        };
        log::debug!("Syncing {}", collection.sync_key());

        let mut notes = match self.api.list(collection) {
            Ok(notes) => notes,
            Err(e) => {
                log::warn!("Sync of {} failed: {e}", collection.sync_key());
                lane.write().phase = previous;
                return SyncOutcome::Failed;
            }
        };
        if token.is_cancelled() {
            lane.write().phase = previous;
            return SyncOutcome::Cancelled;
        }

        collection.sort(&mut notes);
        let count = notes.len();
        {
            let mut state = lane.write();
            state.notes = notes.clone();
            state.phase = SyncPhase::Synced;
        }

        match self.store.replace_all(collection, &notes) {
            Ok(()) => {
                let now = Utc::now().timestamp_millis();
                if let Err(e) = self.store.set_last_sync_time(collection, now) {
                    log::warn!("Failed to stamp sync time for {}: {e}", collection.sync_key());
                }
            }
            Err(e) => log::warn!("Failed to update offline cache for {}: {e}", collection.sync_key()),
        }
        log::debug!("Synced {count} notes for {}", collection.sync_key());
        SyncOutcome::Synced { count }
    }

    fn reconcile(&self, collections: &[Collection]) {
        for &collection in collections {
            log::warn!("Reconciling {} after a failed mutation", collection.sync_key());
            self.sync(collection);
        }
    }

    // ── Local state helpers ─────────────────────────────────────

    fn upsert_local(&self, collection: Collection, note: Note) {
        if let Err(e) = self.store.put_all(collection, std::slice::from_ref(&note)) {
            log::warn!("Failed to cache note {}: {e}", note.id);
        }
        let mut state = self.lane(collection).write();
        match state.notes.iter_mut().find(|n| n.id == note.id) {
            Some(existing) => *existing = note,
            None => state.notes.push(note),
        }
        collection.sort(&mut state.notes);
    }

    fn remove_local(&self, collection: Collection, id: &str) -> Option<Note> {
        if let Err(e) = self.store.delete(collection, id) {
            log::warn!("Failed to drop cached note {id}: {e}");
        }
        let mut state = self.lane(collection).write();
        let index = state.notes.iter().position(|n| n.id == id)?;
        Some(state.notes.remove(index))
    }

    // ── Mutations ───────────────────────────────────────────────

    /// Creates a note, showing a provisional copy until the server answers.
    pub fn create_note(&self, new_note: NewNote) -> Result<Note> {
        let now = Utc::now();
        let provisional = Note {
            id: format!("local-{}", Uuid::new_v4().simple()),
            title: new_note.effective_title().to_string(),
            content: new_note.content.clone(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            images: new_note.images.clone(),
            link_previews: Vec::new(),
        };
        let provisional_id = provisional.id.clone();
        self.upsert_local(Collection::Active, provisional);

        match self.api.create(&new_note) {
            Ok(note) => {
                self.remove_local(Collection::Active, &provisional_id);
                self.upsert_local(Collection::Active, note.clone());
                log::info!("Created note {}", note.id);
                Ok(note)
            }
            Err(e) => {
                self.reconcile(&[Collection::Active]);
                Err(e)
            }
        }
    }

    /// Applies `update` locally, then persists it and adopts the server copy.
    ///
    /// # Errors
    ///
    /// Returns [`NotesError::NoteNotFound`] if `id` is not an active note,
    /// or the remote error after reconciling.
    pub fn update_note(&self, id: &str, update: &NoteUpdate) -> Result<Note> {
        let mut local = self
            .find(Collection::Active, id)
            .ok_or_else(|| NotesError::NoteNotFound(id.to_string()))?;
        update.apply_to(&mut local, Utc::now());
        self.upsert_local(Collection::Active, local);

        match self.api.update(id, &update.to_patch()) {
            Ok(note) => {
                self.upsert_local(Collection::Active, note.clone());
                Ok(note)
            }
            Err(e) => {
                self.reconcile(&[Collection::Active]);
                Err(e)
            }
        }
    }

    /// Moves a note to the recycle bin.
    pub fn delete_note(&self, id: &str) -> Result<()> {
        if let Some(mut note) = self.remove_local(Collection::Active, id) {
            note.deleted_at = Some(Utc::now());
            self.upsert_local(Collection::Deleted, note);
        }
        match self.api.delete(id) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.reconcile(&[Collection::Active, Collection::Deleted]);
                Err(e)
            }
        }
    }

    /// Moves a note out of the recycle bin.
    pub fn restore_note(&self, id: &str) -> Result<Note> {
        let binned = self.remove_local(Collection::Deleted, id);
        if let Some(note) = &binned {
            let mut local = note.clone();
            local.deleted_at = None;
            self.upsert_local(Collection::Active, local);
        }

        match self.api.restore(id) {
            Ok(mut note) => {
                // The restore response carries no images or previews.
                if let Some(local) = binned {
                    if note.images.is_empty() {
                        note.images = local.images;
                    }
                    if note.link_previews.is_empty() {
                        note.link_previews = local.link_previews;
                    }
                }
                self.upsert_local(Collection::Active, note.clone());
                log::info!("Restored note {id}");
                Ok(note)
            }
            Err(e) => {
                self.reconcile(&[Collection::Active, Collection::Deleted]);
                Err(e)
            }
        }
    }

    /// Permanently deletes a note from the recycle bin.
    pub fn purge_note(&self, id: &str) -> Result<()> {
        self.remove_local(Collection::Deleted, id);
        match self.api.purge(id) {
            Ok(()) => {
                log::info!("Permanently deleted note {id}");
                Ok(())
            }
            Err(e) => {
                self.reconcile(&[Collection::Deleted]);
                Err(e)
            }
        }
    }

    /// Called when the user leaves a note. Blank notes are deleted.
    ///
    /// Returns `true` if the note was deleted.
    pub fn close_note(&self, id: &str) -> Result<bool> {
        match self.find(Collection::Active, id) {
            Some(note) if note.is_blank() => {
                self.delete_note(id)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Appends a preview card to a note.
    pub fn add_link_preview(&self, id: &str, preview: LinkPreviewData) -> Result<Note> {
        let note = self
            .find(Collection::Active, id)
            .ok_or_else(|| NotesError::NoteNotFound(id.to_string()))?;
        let mut link_previews = note.link_previews;
        link_previews.push(preview.into_preview(format!("preview-{}", Uuid::new_v4().simple())));
        self.update_note(id, &NoteUpdate::LinkPreviews { link_previews })
    }

    pub fn remove_link_preview(&self, id: &str, preview_id: &str) -> Result<Note> {
        let note = self
            .find(Collection::Active, id)
            .ok_or_else(|| NotesError::NoteNotFound(id.to_string()))?;
        let link_previews = note
            .link_previews
            .into_iter()
            .filter(|p| p.id != preview_id)
            .collect();
        self.update_note(id, &NoteUpdate::LinkPreviews { link_previews })
    }
}

impl<S, A> SyncEngine<S, A>
where
    S: LocalStore + 'static,
    A: NoteApi + 'static,
{
    /// Shows cached notes immediately, then syncs on a background thread.
    ///
    /// For the active collection, an empty remote result is seeded with a
    /// welcome note when [`EngineConfig::seed_welcome_note`] is set.
    pub fn mount(self: &Arc<Self>, collection: Collection, token: &CancelToken) -> JoinHandle<SyncOutcome> {
        self.load_cached(collection);
        let engine = Arc::clone(self);
        let token = token.clone();
        thread::spawn(move || {
            let outcome = engine.sync_with(collection, &token);
            if outcome == (SyncOutcome::Synced { count: 0 })
                && collection == Collection::Active
                && engine.config.seed_welcome_note
                && !token.is_cancelled()
            {
                if let Err(e) = engine.create_note(NewNote::new(WELCOME_TITLE, WELCOME_CONTENT)) {
                    log::warn!("Failed to create welcome note: {e}");
                }
            }
            outcome
        })
    }
}
