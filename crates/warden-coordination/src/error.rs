use thiserror::Error;

/// Errors raised by the coordination backends.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The path was read or written before it was created.
    #[error("No node at path: {path}")]
    NoNode { path: String },

    /// The backend cannot serve requests right now.
    #[error("Coordination store unavailable: {0}")]
    Unavailable(String),

    /// `start` was called on an election that is already participating.
    #[error("Election already started for group: {group}")]
    AlreadyStarted { group: String },
}

pub type Result<T> = std::result::Result<T, CoordinationError>;
