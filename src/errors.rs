//! Error types for the wsnotes application.
//!
//! This module defines the error type shared by the store, the backends and
//! the command-line front end.

use std::{io, path::PathBuf};

use thiserror::Error;

/// The main error type for the wsnotes application.
#[derive(Error, Debug)]
pub enum NotesError {
    /// Errors related to file I/O operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Errors related to serialization/deserialization operations.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport-level failure talking to the hosted backend.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend rejected or failed a table operation.
    #[error("Remote error on table '{table}': {message}")]
    Remote { table: String, message: String },

    /// Authentication call failed (sign in, sign out, identity lookup).
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    /// A user-scoped operation was called without a signed-in user.
    #[error("Not signed in")]
    NotAuthenticated,

    /// Row returned by the backend did not have the expected shape.
    #[error("Invalid row in '{table}': {message}")]
    InvalidRow { table: String, message: String },

    /// Workspace, folder or note was not found in the loaded tree.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Input rejected by the front end before reaching the store.
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Errors related to configuration.
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// Directory creation or access failed.
    #[error("Failed to create or access directory: {path}")]
    DirectoryError { path: PathBuf },

    /// file not found
    #[error("File not found: {file_path}")]
    FileNotFound { file_path: String },

    #[error("{message}")]
    EditorError { message: String },
}

impl NotesError {
    /// Shorthand for a remote failure on `table`.
    pub fn remote(table: impl Into<String>, message: impl Into<String>) -> Self {
        NotesError::Remote {
            table: table.into(),
            message: message.into(),
        }
    }
}
