//! Error types for quill-core

use thiserror::Error;

use crate::lifecycle::ApplicationState;
use crate::sync::SyncError;

/// Result type alias using quill-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in quill-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local store error
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Item not found
    #[error("Item not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Item or editing surface is locked
    #[error("Locked: {0}")]
    Locked(String),

    /// Operation needs an identifier the item does not have yet
    #[error("Item {0} has no identifier yet")]
    Unidentified(String),

    /// Identifier assignment failed; the item stays local
    #[error("Failed to initialize item: {0}")]
    IdentifierAssignment(String),

    /// Rejected application state transition
    #[error("Invalid lifecycle transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: ApplicationState,
        to: ApplicationState,
    },

    /// Remote sync failure
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// The sync service stopped; no further local edits are accepted
    #[error("Sync service is shut down")]
    ShutDown,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
