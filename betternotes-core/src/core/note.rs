//! Note entities as they travel over the wire and sit in the local cache.
//!
//! All types serialize in camelCase to match the remote API. Timestamps are
//! RFC 3339 strings on the wire and [`DateTime<Utc>`] in memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title given to notes created without one.
pub const DEFAULT_TITLE: &str = "New Note";

/// An image owned by a note and referenced from its content by `[IMAGE:id]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteImage {
    pub id: String,
    pub url: String,
    pub name: String,
}

/// A link preview card attached to a note. Not referenced from the content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteLinkPreview {
    pub id: String,
    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
}

/// A note as returned by the remote API and stored in the local cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub title: String,
    /// Flat marked-up content; the single source of truth for block structure.
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub images: Vec<NoteImage>,
    #[serde(default)]
    pub link_previews: Vec<NoteLinkPreview>,
}

impl Note {
    /// Returns `true` when both the title and the content are whitespace-only.
    pub fn is_blank(&self) -> bool {
        self.title.trim().is_empty() && self.content.trim().is_empty()
    }

    /// Case-insensitive substring match on title or content.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.title.to_lowercase().contains(&query) || self.content.to_lowercase().contains(&query)
    }
}

/// Payload for creating a note.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNote {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub images: Vec<NoteImage>,
}

impl NewNote {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            images: Vec::new(),
        }
    }

    /// The title the server will store: the given one, or [`DEFAULT_TITLE`] if empty.
    pub fn effective_title(&self) -> &str {
        if self.title.is_empty() {
            DEFAULT_TITLE
        } else {
            &self.title
        }
    }
}

/// One partial update to a note.
///
/// Each variant is a valid combination of fields; content and images travel
/// together so that image id remapping happens in the same persisted update.
#[derive(Debug, Clone, PartialEq)]
pub enum NoteUpdate {
    /// Rename only.
    Title { title: String },
    /// New content, optionally with the title and the full image list.
    Content {
        title: Option<String>,
        content: String,
        images: Option<Vec<NoteImage>>,
    },
    /// Replace the ordered link-preview collection.
    LinkPreviews { link_previews: Vec<NoteLinkPreview> },
}

impl NoteUpdate {
    /// Builds the wire patch for this update.
    pub fn to_patch(&self) -> NotePatch {
        match self {
            Self::Title { title } => NotePatch {
                title: Some(title.clone()),
                ..NotePatch::default()
            },
            Self::Content {
                title,
                content,
                images,
            } => NotePatch {
                title: title.clone(),
                content: Some(content.clone()),
                images: images.clone(),
                ..NotePatch::default()
            },
            Self::LinkPreviews { link_previews } => NotePatch {
                link_previews: Some(link_previews.clone()),
                ..NotePatch::default()
            },
        }
    }

    /// Applies the update to a local copy of the note and bumps `updated_at`.
    pub fn apply_to(&self, note: &mut Note, now: DateTime<Utc>) {
        self.to_patch().apply_to(note);
        note.updated_at = now;
    }
}

/// The wire form of a partial update; absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<NoteImage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_previews: Option<Vec<NoteLinkPreview>>,
}

impl NotePatch {
    /// Copies every present field onto `note`.
    pub fn apply_to(&self, note: &mut Note) {
        if let Some(title) = &self.title {
            note.title = title.clone();
        }
        if let Some(content) = &self.content {
            note.content = content.clone();
        }
        if let Some(images) = &self.images {
            note.images = images.clone();
        }
        if let Some(previews) = &self.link_previews {
            note.link_previews = previews.clone();
        }
    }
}

/// The two independently synchronised note sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Notes visible in the main grid.
    Active,
    /// Soft-deleted notes in the recycle bin.
    Deleted,
}

impl Collection {
    /// Local cache table backing this collection.
    pub fn table(self) -> &'static str {
        match self {
            Self::Active => "notes",
            Self::Deleted => "deleted_notes",
        }
    }

    /// Key under which the last sync time is recorded.
    pub fn sync_key(self) -> &'static str {
        match self {
            Self::Active => "notes",
            Self::Deleted => "deletedNotes",
        }
    }

    /// Sorts notes into display order: most recently updated first for the
    /// active set, most recently deleted first for the recycle bin.
    pub fn sort(self, notes: &mut [Note]) {
        match self {
            Self::Active => notes.sort_by(|a, b| {
                b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id))
            }),
            Self::Deleted => notes.sort_by(|a, b| {
                let ka = a.deleted_at.unwrap_or(a.updated_at);
                let kb = b.deleted_at.unwrap_or(b.updated_at);
                kb.cmp(&ka).then_with(|| a.id.cmp(&b.id))
            }),
        }
    }
}
