//! Error types for the Better Notes core library.

use thiserror::Error;

/// All errors that can occur within the Better Notes core library.
#[derive(Debug, Error)]
pub enum NotesError {
    /// A SQLite operation on the local cache failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A note or payload could not be (de)serialized as JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An I/O operation on the filesystem failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A note ID was requested that does not exist.
    #[error("Note not found: {0}")]
    NoteNotFound(String),

    /// An editor operation referenced a block that is not in the sequence.
    #[error("Block not found: {0}")]
    BlockNotFound(String),

    /// The opened file is not a valid note cache.
    #[error("Invalid cache: {0}")]
    InvalidCache(String),

    /// The remote API answered with a non-success status.
    #[error("Remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    /// The remote API could not be reached.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A URL could not be parsed or normalised.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Convenience alias that pins the error type to [`NotesError`].
pub type Result<T> = std::result::Result<T, NotesError>;

impl NotesError {
    /// Returns a short, human-readable message suitable for display to the end user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Database(e) => format!("Failed to update offline copy: {e}"),
            Self::Json(e) => format!("Data format error: {e}"),
            Self::Io(e) => format!("File error: {e}"),
            Self::NoteNotFound(_) => "Note no longer exists".to_string(),
            Self::BlockNotFound(_) => "That part of the note no longer exists".to_string(),
            Self::InvalidCache(_) => "Could not open the offline cache".to_string(),
            Self::Remote { status: 404, .. } => "Note not found on the server".to_string(),
            Self::Remote { message, .. } => format!("Server error: {message}"),
            Self::Transport(_) => "You appear to be offline".to_string(),
            Self::InvalidUrl(url) => format!("Not a valid link: {url}"),
        }
    }

    /// Returns `true` when the server reported the resource as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NoteNotFound(_) | Self::Remote { status: 404, .. })
    }
}
