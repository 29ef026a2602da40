//! Internal domain modules for the Better Notes core library.
//!
//! All public types from these modules are re-exported at the crate root
//! with `#[doc(inline)]`; import from there in preference to this module.

pub mod blocks;
pub mod cache;
pub mod debounce;
pub mod editor;
pub mod error;
#[cfg(feature = "http")]
pub mod http;
pub mod link_preview;
pub mod note;
pub mod remote;
pub mod session;
pub mod settings;
pub mod storage;
pub mod store;
pub mod sync;

#[doc(inline)]
pub use blocks::{BlockKind, BlockType, ContentBlock};
#[doc(inline)]
pub use cache::NoteCache;
#[doc(inline)]
pub use debounce::{CancelToken, DebounceHandle, Debouncer};
#[doc(inline)]
pub use editor::{BackspaceOutcome, BlockEditor, Focus};
#[doc(inline)]
pub use error::{NotesError, Result};
#[cfg(feature = "http")]
#[doc(inline)]
pub use http::HttpNoteApi;
#[doc(inline)]
pub use link_preview::{LinkPreviewData, LinkPreviewFetcher, OpenGraph};
#[doc(inline)]
pub use note::{Collection, NewNote, Note, NoteImage, NoteLinkPreview, NotePatch, NoteUpdate};
#[doc(inline)]
pub use remote::{Endpoints, MemoryNoteApi, NoteApi};
#[doc(inline)]
pub use session::NoteSession;
#[doc(inline)]
pub use settings::ClientSettings;
#[doc(inline)]
pub use storage::Storage;
#[doc(inline)]
pub use store::{LocalStore, MemoryStore};
#[doc(inline)]
pub use sync::{EngineConfig, SyncEngine, SyncOutcome, SyncPhase};
