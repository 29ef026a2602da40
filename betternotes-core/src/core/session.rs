//! One open note: block editing with debounced saving.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::core::blocks::ContentBlock;
use crate::core::debounce::{DebounceHandle, Debouncer};
use crate::core::editor::{BlockEditor, Focus};
use crate::core::note::{NoteImage, NoteUpdate};
use crate::core::remote::NoteApi;
use crate::core::store::LocalStore;
use crate::core::sync::SyncEngine;
use crate::{NotesError, Result};

struct SessionState {
    editor: BlockEditor,
    title: String,
    images: Vec<NoteImage>,
    /// The image list changed since the server last confirmed it.
    images_dirty: bool,
}

impl SessionState {
    fn pending_update(&self) -> NoteUpdate {
        let images = if self.images_dirty {
            let referenced: HashSet<String> = self.editor.image_ids().into_iter().collect();
            Some(
                self.images
                    .iter()
                    .filter(|img| referenced.contains(&img.id))
                    .cloned()
                    .collect(),
            )
        } else {
            None
        };
        NoteUpdate::Content {
            title: Some(self.title.clone()),
            content: self.editor.content(),
            images,
        }
    }

    /// Swaps client image ids for the ids the server assigned, matching
    /// uploads by url and name.
    fn adopt_server_images(&mut self, server: &[NoteImage]) {
        let server_ids: HashSet<&str> = server.iter().map(|img| img.id.as_str()).collect();
        let mut claimed: HashSet<&str> = self
            .images
            .iter()
            .map(|img| img.id.as_str())
            .filter(|id| server_ids.contains(id))
            .collect();

        let mut remap: HashMap<String, NoteImage> = HashMap::new();
        for local in self.images.iter().filter(|img| !server_ids.contains(img.id.as_str())) {
            let found = server.iter().find(|candidate| {
                !claimed.contains(candidate.id.as_str())
                    && candidate.url == local.url
                    && candidate.name == local.name
            });
            if let Some(found) = found {
                claimed.insert(found.id.as_str());
                remap.insert(local.id.clone(), found.clone());
            }
        }

        if !remap.is_empty() {
            log::debug!("Adopting {} server image ids", remap.len());
            self.editor.remap_images(&remap);
            for image in &mut self.images {
                if let Some(replacement) = remap.get(&image.id) {
                    *image = replacement.clone();
                }
            }
        }
        self.images_dirty = self
            .images
            .iter()
            .any(|img| !server_ids.contains(img.id.as_str()));
    }
}

fn lock(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An open note being edited.
///
/// Every edit schedules a save of title, content and (when changed) images
/// after a quiet period. Call [`close`](NoteSession::close) to flush and
/// release the note, or [`abandon`](NoteSession::abandon) to drop pending
/// edits.
pub struct NoteSession<S: LocalStore + 'static, A: NoteApi + 'static> {
    note_id: String,
    engine: Arc<SyncEngine<S, A>>,
    state: Arc<Mutex<SessionState>>,
    debouncer: Debouncer<NoteUpdate>,
}

impl<S: LocalStore + 'static, A: NoteApi + 'static> NoteSession<S, A> {
    /// Opens an active note for editing.
    ///
    /// # Errors
    ///
    /// Returns [`NotesError::NoteNotFound`] if the engine has no such note.
    pub fn open(engine: &Arc<SyncEngine<S, A>>, note_id: &str, save_delay: Duration) -> Result<Self> {
        let note = engine
            .note(note_id)
            .filter(|n| n.deleted_at.is_none())
            .ok_or_else(|| NotesError::NoteNotFound(note_id.to_string()))?;

        let state = Arc::new(Mutex::new(SessionState {
            editor: BlockEditor::from_content(&note.content, &note.images),
            title: note.title,
            images: note.images,
            images_dirty: false,
        }));

        let save_engine = Arc::clone(engine);
        let save_state = Arc::clone(&state);
        let id = note_id.to_string();
        let debouncer = Debouncer::new(save_delay, move |update: NoteUpdate| {
            match save_engine.update_note(&id, &update) {
                Ok(saved) => lock(&save_state).adopt_server_images(&saved.images),
                Err(e) => log::warn!("Failed to save note {id}: {e}"),
            }
        });

        Ok(Self {
            note_id: note_id.to_string(),
            engine: Arc::clone(engine),
            state,
            debouncer,
        })
    }

    pub fn note_id(&self) -> &str {
        &self.note_id
    }

    pub fn title(&self) -> String {
        lock(&self.state).title.clone()
    }

    pub fn content(&self) -> String {
        lock(&self.state).editor.content()
    }

    pub fn blocks(&self) -> Vec<ContentBlock> {
        lock(&self.state).editor.blocks().to_vec()
    }

    pub fn focus(&self) -> Option<Focus> {
        lock(&self.state).editor.focus().cloned()
    }

    pub fn images(&self) -> Vec<NoteImage> {
        lock(&self.state).images.clone()
    }

    pub fn set_title(&self, title: impl Into<String>) {
        lock(&self.state).title = title.into();
        self.schedule_save();
    }

    /// Runs an editor operation and schedules a save.
    pub fn edit<R>(&self, f: impl FnOnce(&mut BlockEditor) -> R) -> R {
        let result = f(&mut lock(&self.state).editor);
        self.schedule_save();
        result
    }

    /// Inserts `image` at the cursor; it is uploaded with the next save.
    pub fn paste_image(&self, image: NoteImage) -> String {
        let focus_id = {
            let mut state = lock(&self.state);
            state.images.push(image.clone());
            state.images_dirty = true;
            state.editor.paste_image(image)
        };
        self.schedule_save();
        focus_id
    }

    pub fn remove_image(&self, image_id: &str) {
        {
            let mut state = lock(&self.state);
            state.editor.remove_image(image_id);
            state.images.retain(|img| img.id != image_id);
            state.images_dirty = true;
        }
        self.schedule_save();
    }

    /// Saves pending edits now and waits for the save to finish.
    pub fn flush(&self) {
        self.debouncer.flush_now();
    }

    pub fn handle(&self) -> DebounceHandle<NoteUpdate> {
        self.debouncer.handle()
    }

    fn schedule_save(&self) {
        let update = lock(&self.state).pending_update();
        self.debouncer.push(update);
    }

    /// Flushes pending edits, stops saving, and deletes the note if blank.
    ///
    /// Returns `true` if the note was deleted.
    pub fn close(self) -> Result<bool> {
        self.debouncer.close();
        self.engine.close_note(&self.note_id)
    }

    /// Stops saving without flushing pending edits.
    pub fn abandon(self) {
        self.debouncer.handle().cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::blocks::BlockType;
    use crate::core::note::{Collection, NewNote};
    use crate::core::remote::MemoryNoteApi;
    use crate::core::store::MemoryStore;
    use crate::core::sync::EngineConfig;

    type Engine = SyncEngine<MemoryStore, MemoryNoteApi>;

    fn engine_with_note(title: &str, content: &str) -> (Arc<Engine>, String) {
        let engine = Arc::new(SyncEngine::with_config(
            MemoryStore::new(),
            MemoryNoteApi::new(),
            EngineConfig {
                seed_welcome_note: false,
            },
        ));
        let note = engine.create_note(NewNote::new(title, content)).unwrap();
        (engine, note.id)
    }

    fn pasted(id: &str) -> NoteImage {
        NoteImage {
            id: id.to_string(),
            url: format!("data:image/png;base64,{id}"),
            name: format!("pasted-image-{id}.png"),
        }
    }

    #[test]
    fn test_open_unknown_note() {
        let (engine, _) = engine_with_note("T", "");
        let result = NoteSession::open(&engine, "missing", Duration::from_millis(10));
        assert!(matches!(result, Err(NotesError::NoteNotFound(_))));
    }

    #[test]
    fn test_edits_are_saved_on_flush() {
        let (engine, id) = engine_with_note("Draft", "hello");
        let session = NoteSession::open(&engine, &id, Duration::from_secs(10)).unwrap();

        let block_id = session.blocks()[0].id.clone();
        session
            .edit(|editor| editor.update_content(&block_id, "hello world"))
            .unwrap();
        session.set_title("Final");
        assert_eq!(engine.note(&id).unwrap().content, "hello");

        session.flush();
        let saved = engine.note(&id).unwrap();
        assert_eq!(saved.title, "Final");
        assert_eq!(saved.content, "hello world");
        assert_eq!(engine.api().list(Collection::Active).unwrap()[0].content, "hello world");
    }

    #[test]
    fn test_pasted_image_gets_server_id() {
        let (engine, id) = engine_with_note("Pics", "before after");
        let session = NoteSession::open(&engine, &id, Duration::from_secs(10)).unwrap();
        let block_id = session.blocks()[0].id.clone();
        session
            .edit(|editor| editor.set_focus(&block_id, "before".chars().count()))
            .unwrap();

        session.paste_image(pasted("tmp-1"));
        let types: Vec<_> = session.blocks().iter().map(|b| b.block_type()).collect();
        assert_eq!(types, vec![BlockType::Text, BlockType::Image, BlockType::Text]);

        session.flush();
        let saved = engine.note(&id).unwrap();
        let server_id = saved.images[0].id.clone();
        assert_ne!(server_id, "tmp-1");
        assert_eq!(saved.content, format!("before\n\n[IMAGE:{server_id}]\n\n after"));

        // The session now refers to the server id, so later saves keep the image.
        assert_eq!(session.images()[0].id, server_id);
        let image_block = session.blocks()[1].image_ref().cloned().unwrap();
        assert_eq!(image_block.id, server_id);

        let last_id = session.blocks()[2].id.clone();
        session
            .edit(|editor| editor.update_content(&last_id, "after, edited"))
            .unwrap();
        session.flush();
        let saved = engine.note(&id).unwrap();
        assert_eq!(saved.images.len(), 1);
        assert_eq!(saved.images[0].id, server_id);
        assert!(saved.content.contains(&format!("[IMAGE:{server_id}]")));
    }

    #[test]
    fn test_removed_image_is_dropped_on_save() {
        let (engine, id) = engine_with_note("Pics", "");
        let session = NoteSession::open(&engine, &id, Duration::from_secs(10)).unwrap();
        session.paste_image(pasted("tmp-1"));
        session.flush();
        let server_id = session.images()[0].id.clone();

        session.remove_image(&server_id);
        session.flush();
        let saved = engine.note(&id).unwrap();
        assert!(saved.images.is_empty());
        assert!(!saved.content.contains("[IMAGE:"));
    }

    #[test]
    fn test_close_flushes_pending_save() {
        let (engine, id) = engine_with_note("Draft", "");
        let session = NoteSession::open(&engine, &id, Duration::from_secs(10)).unwrap();
        let block_id = session.blocks()[0].id.clone();
        session
            .edit(|editor| editor.update_content(&block_id, "kept"))
            .unwrap();

        let handle = session.handle();
        assert!(!session.close().unwrap());
        assert!(handle.is_cancelled());
        assert_eq!(engine.note(&id).unwrap().content, "kept");
    }

    #[test]
    fn test_close_deletes_blank_note() {
        let (engine, id) = engine_with_note("Title", "text");
        let session = NoteSession::open(&engine, &id, Duration::from_secs(10)).unwrap();
        let block_id = session.blocks()[0].id.clone();
        session.set_title("");
        session
            .edit(|editor| editor.update_content(&block_id, ""))
            .unwrap();

        assert!(session.close().unwrap());
        assert!(engine.notes(Collection::Active).is_empty());
        assert_eq!(engine.notes(Collection::Deleted).len(), 1);
    }

    #[test]
    fn test_abandon_discards_pending_edits() {
        let (engine, id) = engine_with_note("Draft", "original");
        let session = NoteSession::open(&engine, &id, Duration::from_secs(10)).unwrap();
        let block_id = session.blocks()[0].id.clone();
        session
            .edit(|editor| editor.update_content(&block_id, "discarded"))
            .unwrap();

        session.abandon();
        assert_eq!(engine.note(&id).unwrap().content, "original");
    }

    #[test]
    fn test_debounced_save_fires_after_quiet_period() {
        let (engine, id) = engine_with_note("Draft", "");
        let session = NoteSession::open(&engine, &id, Duration::from_millis(30)).unwrap();
        session.set_title("Autosaved");
        std::thread::sleep(Duration::from_millis(400));
        assert_eq!(engine.note(&id).unwrap().title, "Autosaved");
        session.abandon();
    }
}
