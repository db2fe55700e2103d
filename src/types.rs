//! Shared value types for the wsnotes application.
//!
//! Identity records, the selection cursor, partial note updates and the
//! command-line subcommands.
use std::path::PathBuf;

use clap::Subcommand;
use serde::{Deserialize, Serialize};

use crate::NotesError;

/// A specialized Result type for wsnotes operations.
pub type Result<T> = std::result::Result<T, NotesError>;

/// Authenticated identity as reported by the auth backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Persisted session for the hosted backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub user: User,
}

/// Partial update of a note. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
}

impl NoteUpdate {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            content: None,
        }
    }

    pub fn content(content: impl Into<String>) -> Self {
        Self {
            title: None,
            content: Some(content.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none()
    }
}

/// The workspace/folder/note cursor. An empty string means "none selected".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub workspace_id: String,
    pub folder_id: String,
    pub note_id: String,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.workspace_id.is_empty() && self.folder_id.is_empty() && self.note_id.is_empty()
    }

    pub fn clear(&mut self) {
        self.workspace_id.clear();
        self.folder_id.clear();
        self.note_id.clear();
    }
}

/// Gate state shown by the front end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    /// Identity check or tree load in flight
    Loading,
    Unauthenticated,
    Authenticated,
}

impl std::fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthStatus::Loading => write!(f, "loading"),
            AuthStatus::Unauthenticated => write!(f, "signed out"),
            AuthStatus::Authenticated => write!(f, "signed in"),
        }
    }
}

/// Available subcommands for the wsnotes application
#[derive(Subcommand)]
pub enum Commands {
    /// Sign in with the configured identity provider
    Login {
        /// Access token obtained from the provider redirect (hosted backend)
        #[clap(short, long)]
        token: Option<String>,

        /// Refresh token from the same redirect, used to renew the session
        #[clap(long, requires = "token")]
        refresh_token: Option<String>,
    },

    /// Sign out and forget the local session
    Logout,

    /// Show the signed-in user
    Whoami,

    /// Print the workspace/folder/note tree
    Tree {
        /// Only show notes whose title or content contains this text
        #[clap(short, long)]
        search: Option<String>,

        /// Format output as JSON
        #[clap(short, long)]
        json: bool,
    },

    /// Workspace operations
    Workspace {
        #[clap(subcommand)]
        action: WorkspaceAction,
    },

    /// Folder operations
    Folder {
        #[clap(subcommand)]
        action: FolderAction,
    },

    /// Note operations
    Note {
        #[clap(subcommand)]
        action: NoteAction,
    },

    /// Configuration management
    Config {
        /// Reset configuration to defaults
        #[clap(short, long)]
        reset: bool,
    },
}

#[derive(Subcommand)]
pub enum WorkspaceAction {
    /// Create a new workspace
    Create {
        /// Name of the workspace
        name: String,

        /// Optional description
        #[clap(short, long)]
        description: Option<String>,
    },

    /// Delete a workspace with all its folders and notes
    Delete {
        /// ID of the workspace to delete
        id: String,

        /// Skip confirmation prompt
        #[clap(short, long)]
        force: bool,
    },
}

#[derive(Subcommand)]
pub enum FolderAction {
    /// Create a new folder inside a workspace
    Create {
        /// ID of the owning workspace
        workspace_id: String,

        /// Name of the folder
        name: String,
    },

    /// Delete a folder with all its notes
    Delete {
        /// ID of the folder to delete
        id: String,

        /// Skip confirmation prompt
        #[clap(short, long)]
        force: bool,
    },
}

#[derive(Subcommand)]
pub enum NoteAction {
    /// Create a new, empty note inside a folder
    Create {
        /// ID of the owning folder
        folder_id: String,

        /// Title of the note
        title: String,

        /// Open the new note in the editor right away
        #[clap(short, long)]
        edit: bool,
    },

    /// View a note by ID
    Show {
        /// ID of the note to view
        id: String,

        /// Format output as raw JSON
        #[clap(short, long)]
        json: bool,
    },

    /// Edit an existing note
    Edit {
        /// ID of the note to edit
        id: String,

        /// New title for the note
        #[clap(short = 'T', long)]
        title: Option<String>,

        /// New content for the note
        #[clap(short, long)]
        content: Option<String>,

        /// Path to a file containing the new note content
        #[clap(short, long)]
        file: Option<PathBuf>,

        /// Open content in editor before saving
        #[clap(short, long)]
        edit: bool,
    },

    /// Delete a note by ID
    Delete {
        /// ID of the note to delete
        id: String,

        /// Skip confirmation prompt
        #[clap(short, long)]
        force: bool,
    },
}
