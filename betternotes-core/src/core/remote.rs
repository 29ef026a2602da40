//! The remote note API contract, its URL layout, and an in-process backend.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use url::Url;
use uuid::Uuid;

use crate::core::blocks::remap_image_markers;
use crate::core::note::{Collection, NewNote, Note, NoteImage, NoteLinkPreview, NotePatch};
use crate::{NotesError, Result};

/// Operations the sync engine needs from the server.
///
/// Non-success responses surface as [`NotesError::Remote`]; an unreachable
/// server surfaces as [`NotesError::Transport`].
pub trait NoteApi: Send + Sync {
    /// Every note in `collection`, in server order.
    fn list(&self, collection: Collection) -> Result<Vec<Note>>;

    fn create(&self, note: &NewNote) -> Result<Note>;

    /// Applies `patch` and returns the server representation, with any
    /// client image ids already replaced by server ids.
    fn update(&self, id: &str, patch: &NotePatch) -> Result<Note>;

    /// Soft delete: moves the note into the recycle bin.
    fn delete(&self, id: &str) -> Result<()>;

    /// Moves a note out of the recycle bin.
    fn restore(&self, id: &str) -> Result<Note>;

    /// Permanently deletes a note that is in the recycle bin.
    fn purge(&self, id: &str) -> Result<()>;
}

/// URL layout of the notes API, rooted at a base such as `https://host/api`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base: Url,
}

impl Endpoints {
    /// # Errors
    ///
    /// Returns [`NotesError::InvalidUrl`] if `base` is not an absolute
    /// hierarchical URL.
    pub fn new(base: &str) -> Result<Self> {
        let base = Url::parse(base).map_err(|e| NotesError::InvalidUrl(format!("{base}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(NotesError::InvalidUrl(base.to_string()));
        }
        Ok(Self { base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// `GET` target for a collection.
    pub fn list(&self, collection: Collection) -> Url {
        match collection {
            Collection::Active => self.build(&["notes"]),
            Collection::Deleted => self.build(&["notes", "deleted"]),
        }
    }

    /// `POST` target for new notes.
    pub fn create(&self) -> Url {
        self.build(&["notes"])
    }

    /// `PATCH` and soft `DELETE` target for one note.
    pub fn note(&self, id: &str) -> Url {
        self.build(&["notes", id])
    }

    pub fn restore(&self, id: &str) -> Url {
        self.build(&["notes", "restore", id])
    }

    pub fn purge(&self, id: &str) -> Url {
        self.build(&["notes", "permanent-delete", id])
    }

    fn build(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // Cannot fail: `new` rejects cannot-be-a-base URLs.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

struct ServerState {
    notes: Vec<Note>,
    last_tick: DateTime<Utc>,
    offline: bool,
}

impl ServerState {
    /// Strictly increasing timestamps so ordering stays deterministic.
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now().max(self.last_tick + Duration::milliseconds(1));
        self.last_tick = now;
        now
    }

    fn check_online(&self) -> Result<()> {
        if self.offline {
            Err(NotesError::Transport("server unreachable".to_string()))
        } else {
            Ok(())
        }
    }

    fn find_mut(&mut self, id: &str, in_bin: bool) -> Option<&mut Note> {
        self.notes
            .iter_mut()
            .find(|n| n.id == id && n.deleted_at.is_some() == in_bin)
    }
}

fn not_found(message: &str) -> NotesError {
    NotesError::Remote {
        status: 404,
        message: message.to_string(),
    }
}

fn server_id() -> String {
    Uuid::new_v4().to_string()
}

/// Gives every image the server does not already know a fresh id.
///
/// Returns the resulting image list and the old-to-new id map.
fn assign_image_ids(
    existing: &[NoteImage],
    incoming: &[NoteImage],
) -> (Vec<NoteImage>, HashMap<String, String>) {
    let known: HashSet<&str> = existing.iter().map(|img| img.id.as_str()).collect();
    let mut remap = HashMap::new();
    let images = incoming
        .iter()
        .map(|img| {
            if known.contains(img.id.as_str()) {
                img.clone()
            } else {
                let id = server_id();
                remap.insert(img.id.clone(), id.clone());
                NoteImage {
                    id,
                    url: img.url.clone(),
                    name: img.name.clone(),
                }
            }
        })
        .collect();
    (images, remap)
}

fn assign_preview_ids(existing: &[NoteLinkPreview], incoming: &[NoteLinkPreview]) -> Vec<NoteLinkPreview> {
    let known: HashSet<&str> = existing.iter().map(|p| p.id.as_str()).collect();
    incoming
        .iter()
        .map(|preview| {
            let mut preview = preview.clone();
            if !known.contains(preview.id.as_str()) {
                preview.id = server_id();
            }
            preview
        })
        .collect()
}

/// An in-process [`NoteApi`] with the semantics of the real server.
///
/// Useful for tests and for running the client without a network.
pub struct MemoryNoteApi {
    state: Mutex<ServerState>,
}

impl Default for MemoryNoteApi {
    fn default() -> Self {
        Self::with_notes(Vec::new())
    }
}

impl MemoryNoteApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the server with `notes` already stored. Notes with a
    /// `deleted_at` start in the recycle bin.
    pub fn with_notes(notes: Vec<Note>) -> Self {
        let last_tick = notes
            .iter()
            .map(|n| n.updated_at)
            .max()
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self {
            state: Mutex::new(ServerState {
                notes,
                last_tick,
                offline: false,
            }),
        }
    }

    /// While offline every call fails with [`NotesError::Transport`].
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.offline = offline;
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ServerState>> {
        self.state
            .lock()
            .map_err(|_| NotesError::Transport("server state lock poisoned".to_string()))
    }
}

impl NoteApi for MemoryNoteApi {
    fn list(&self, collection: Collection) -> Result<Vec<Note>> {
        let state = self.lock()?;
        state.check_online()?;
        let mut notes: Vec<Note> = state
            .notes
            .iter()
            .filter(|n| n.deleted_at.is_some() == (collection == Collection::Deleted))
            .cloned()
            .collect();
        match collection {
            Collection::Active => notes.sort_by_key(|n| n.updated_at),
            Collection::Deleted => notes.sort_by_key(|n| n.deleted_at),
        }
        Ok(notes)
    }

    fn create(&self, new_note: &NewNote) -> Result<Note> {
        let mut state = self.lock()?;
        state.check_online()?;
        let now = state.tick();
        let (images, remap) = assign_image_ids(&[], &new_note.images);
        let note = Note {
            id: server_id(),
            title: new_note.effective_title().to_string(),
            content: remap_image_markers(&new_note.content, &remap),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            images,
            link_previews: Vec::new(),
        };
        state.notes.push(note.clone());
        Ok(note)
    }

    fn update(&self, id: &str, patch: &NotePatch) -> Result<Note> {
        let mut state = self.lock()?;
        state.check_online()?;
        let now = state.tick();
        let note = state
            .notes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| not_found("Note not found"))?;

        if let Some(title) = &patch.title {
            note.title = title.clone();
        }
        match &patch.images {
            Some(incoming) => {
                let (images, remap) = assign_image_ids(&note.images, incoming);
                let content = patch.content.as_deref().unwrap_or(&note.content);
                note.content = remap_image_markers(content, &remap);
                note.images = images;
            }
            None => {
                if let Some(content) = &patch.content {
                    note.content = content.clone();
                }
            }
        }
        if let Some(previews) = &patch.link_previews {
            note.link_previews = assign_preview_ids(&note.link_previews, previews);
        }
        note.updated_at = now;
        Ok(note.clone())
    }

    fn delete(&self, id: &str) -> Result<()> {
        let mut state = self.lock()?;
        state.check_online()?;
        let now = state.tick();
        let note = state
            .find_mut(id, false)
            .ok_or_else(|| not_found("Note not found"))?;
        note.deleted_at = Some(now);
        Ok(())
    }

    fn restore(&self, id: &str) -> Result<Note> {
        let mut state = self.lock()?;
        state.check_online()?;
        let now = state.tick();
        let note = state
            .find_mut(id, true)
            .ok_or_else(|| not_found("Note not found in recycle bin"))?;
        note.deleted_at = None;
        note.updated_at = now;
        Ok(note.clone())
    }

    fn purge(&self, id: &str) -> Result<()> {
        let mut state = self.lock()?;
        state.check_online()?;
        let index = state
            .notes
            .iter()
            .position(|n| n.id == id && n.deleted_at.is_some())
            .ok_or_else(|| not_found("Note not found in recycle bin"))?;
        state.notes.remove(index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(id: &str) -> NoteImage {
        NoteImage {
            id: id.to_string(),
            url: format!("data:image/png;base64,{id}"),
            name: format!("pasted-image-{id}.png"),
        }
    }

    #[test]
    fn test_endpoints_layout() {
        let endpoints = Endpoints::new("https://notes.example.com/api").unwrap();
        assert_eq!(
            endpoints.list(Collection::Active).as_str(),
            "https://notes.example.com/api/notes"
        );
        assert_eq!(
            endpoints.list(Collection::Deleted).as_str(),
            "https://notes.example.com/api/notes/deleted"
        );
        assert_eq!(
            endpoints.note("abc").as_str(),
            "https://notes.example.com/api/notes/abc"
        );
        assert_eq!(
            endpoints.restore("abc").as_str(),
            "https://notes.example.com/api/notes/restore/abc"
        );
        assert_eq!(
            endpoints.purge("abc").as_str(),
            "https://notes.example.com/api/notes/permanent-delete/abc"
        );
    }

    #[test]
    fn test_endpoints_trailing_slash_and_root() {
        let slash = Endpoints::new("http://localhost:3000/api/").unwrap();
        assert_eq!(slash.create().as_str(), "http://localhost:3000/api/notes");

        let root = Endpoints::new("http://localhost:3000").unwrap();
        assert_eq!(root.create().as_str(), "http://localhost:3000/notes");
    }

    #[test]
    fn test_endpoints_escape_ids() {
        let endpoints = Endpoints::new("http://localhost/api").unwrap();
        assert_eq!(
            endpoints.note("a/b").as_str(),
            "http://localhost/api/notes/a%2Fb"
        );
    }

    #[test]
    fn test_endpoints_reject_invalid_base() {
        assert!(matches!(
            Endpoints::new("not a url"),
            Err(NotesError::InvalidUrl(_))
        ));
        assert!(Endpoints::new("mailto:someone@example.com").is_err());
    }

    #[test]
    fn test_create_defaults_title_and_assigns_ids() {
        let api = MemoryNoteApi::new();
        let mut new_note = NewNote::new("", "before\n\n[IMAGE:tmp-1]");
        new_note.images.push(image("tmp-1"));

        let note = api.create(&new_note).unwrap();
        assert_eq!(note.title, "New Note");
        assert_ne!(note.images[0].id, "tmp-1");
        assert_eq!(
            note.content,
            format!("before\n\n[IMAGE:{}]", note.images[0].id)
        );
    }

    #[test]
    fn test_update_remaps_every_marker_in_patch_content() {
        let api = MemoryNoteApi::new();
        let note = api.create(&NewNote::new("T", "")).unwrap();

        let patch = NotePatch {
            content: Some("[IMAGE:tmp]\n\ntext\n\n[IMAGE:tmp]".to_string()),
            images: Some(vec![image("tmp")]),
            ..NotePatch::default()
        };
        let updated = api.update(&note.id, &patch).unwrap();

        let new_id = &updated.images[0].id;
        assert_ne!(new_id, "tmp");
        assert_eq!(
            updated.content,
            format!("[IMAGE:{new_id}]\n\ntext\n\n[IMAGE:{new_id}]")
        );
        assert!(updated.updated_at > note.updated_at);
    }

    #[test]
    fn test_update_keeps_known_images_and_drops_missing() {
        let api = MemoryNoteApi::new();
        let mut new_note = NewNote::new("T", "[IMAGE:a]\n\n[IMAGE:b]");
        new_note.images = vec![image("a"), image("b")];
        let note = api.create(&new_note).unwrap();
        let kept = note.images[0].clone();

        let patch = NotePatch {
            images: Some(vec![kept.clone()]),
            ..NotePatch::default()
        };
        let updated = api.update(&note.id, &patch).unwrap();
        assert_eq!(updated.images, vec![kept]);
        // No content in the patch: the stored content is kept as is.
        assert_eq!(updated.content, note.content);
    }

    #[test]
    fn test_update_remaps_stored_content_when_patch_has_none() {
        let api = MemoryNoteApi::with_notes(vec![Note {
            id: "n1".to_string(),
            title: "T".to_string(),
            content: "[IMAGE:local]".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
            images: vec![],
            link_previews: vec![],
        }]);
        let patch = NotePatch {
            images: Some(vec![image("local")]),
            ..NotePatch::default()
        };
        let updated = api.update("n1", &patch).unwrap();
        assert_eq!(updated.content, format!("[IMAGE:{}]", updated.images[0].id));
    }

    #[test]
    fn test_link_previews_get_server_ids() {
        let api = MemoryNoteApi::new();
        let note = api.create(&NewNote::new("T", "")).unwrap();
        let preview = NoteLinkPreview {
            id: "client".to_string(),
            url: "https://example.com".to_string(),
            title: "Example".to_string(),
            description: None,
            image: None,
            site_name: None,
            favicon: None,
        };
        let patch = NotePatch {
            link_previews: Some(vec![preview]),
            ..NotePatch::default()
        };
        let updated = api.update(&note.id, &patch).unwrap();
        let id = updated.link_previews[0].id.clone();
        assert_ne!(id, "client");

        // Resending the stored list keeps the ids stable.
        let patch = NotePatch {
            link_previews: Some(updated.link_previews.clone()),
            ..NotePatch::default()
        };
        assert_eq!(api.update(&note.id, &patch).unwrap().link_previews[0].id, id);
    }

    #[test]
    fn test_soft_delete_restore_and_purge() {
        let api = MemoryNoteApi::new();
        let note = api.create(&NewNote::new("Keep", "")).unwrap();

        api.delete(&note.id).unwrap();
        assert!(api.list(Collection::Active).unwrap().is_empty());
        let binned = api.list(Collection::Deleted).unwrap();
        assert_eq!(binned.len(), 1);
        assert!(binned[0].deleted_at.is_some());

        let restored = api.restore(&note.id).unwrap();
        assert!(restored.deleted_at.is_none());
        assert_eq!(api.list(Collection::Active).unwrap().len(), 1);

        // Purge only works from the recycle bin.
        assert!(api.purge(&note.id).unwrap_err().is_not_found());
        api.delete(&note.id).unwrap();
        api.purge(&note.id).unwrap();
        assert!(api.list(Collection::Deleted).unwrap().is_empty());
    }

    #[test]
    fn test_restore_requires_recycle_bin() {
        let api = MemoryNoteApi::new();
        let note = api.create(&NewNote::new("T", "")).unwrap();
        let err = api.restore(&note.id).unwrap_err();
        assert!(matches!(err, NotesError::Remote { status: 404, .. }));
    }

    #[test]
    fn test_list_orders_by_updated_at_ascending() {
        let api = MemoryNoteApi::new();
        let first = api.create(&NewNote::new("first", "")).unwrap();
        let second = api.create(&NewNote::new("second", "")).unwrap();
        api.update(
            &first.id,
            &NotePatch {
                title: Some("first, edited".to_string()),
                ..NotePatch::default()
            },
        )
        .unwrap();

        let ids: Vec<_> = api
            .list(Collection::Active)
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[test]
    fn test_offline_fails_with_transport_error() {
        let api = MemoryNoteApi::new();
        api.set_offline(true);
        assert!(matches!(
            api.list(Collection::Active),
            Err(NotesError::Transport(_))
        ));
        api.set_offline(false);
        assert!(api.list(Collection::Active).is_ok());
    }
}
