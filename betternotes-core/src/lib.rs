//! Core library for Better Notes, an offline-first note-taking client.
//!
//! Two pieces make up the core. The block model ([`blocks`], [`BlockEditor`])
//! converts a note's flat marked-up content into typed text, code and image
//! blocks and back. The sync engine ([`SyncEngine`]) serves notes from a local
//! cache and reconciles them against the remote API in the background.
//!
//! Types are re-exported from their respective sub-modules for convenience;
//! consumers should import from the crate root rather than the `core` module.

pub mod core;

// Re-export commonly used types.
#[doc(inline)]
pub use core::{
    blocks::{self, BlockKind, BlockType, ContentBlock},
    cache::NoteCache,
    debounce::{CancelToken, DebounceHandle, Debouncer},
    editor::{BackspaceOutcome, BlockEditor, Focus},
    error::{NotesError, Result},
    link_preview::{
        display_domain, normalize_url, resolve_preview, LinkPreviewData, LinkPreviewFetcher,
        OpenGraph,
    },
    note::{
        Collection, NewNote, Note, NoteImage, NoteLinkPreview, NotePatch, NoteUpdate,
        DEFAULT_TITLE,
    },
    remote::{Endpoints, MemoryNoteApi, NoteApi},
    session::NoteSession,
    settings::{load_settings, load_settings_from, save_settings, save_settings_to, ClientSettings},
    storage::Storage,
    store::{LocalStore, MemoryStore},
    sync::{EngineConfig, SyncEngine, SyncOutcome, SyncPhase},
};

#[cfg(feature = "http")]
#[doc(inline)]
pub use core::http::HttpNoteApi;
