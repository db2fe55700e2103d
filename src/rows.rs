//! Table row shapes.
//!
//! The backend stores snake_case columns. Every read goes through these
//! structs into the in-memory entities, every write is built from them.
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{Folder, Note, NoteUpdate, NotesError, Result, Table, Workspace};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceRow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderRow {
    pub id: String,
    pub name: String,
    pub workspace_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteRow {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    pub folder_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Insert payload for `workspaces`
#[derive(Debug, Clone, Serialize)]
pub struct NewWorkspaceRow<'a> {
    pub name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
    pub user_id: &'a str,
}

/// Insert payload for `folders`
#[derive(Debug, Clone, Serialize)]
pub struct NewFolderRow<'a> {
    pub name: &'a str,
    pub workspace_id: &'a str,
    pub user_id: &'a str,
}

/// Insert payload for `notes`. Content always starts empty.
#[derive(Debug, Clone, Serialize)]
pub struct NewNoteRow<'a> {
    pub title: &'a str,
    pub content: &'a str,
    pub folder_id: &'a str,
    pub user_id: &'a str,
}

/// Partial column set for a note update; absent fields are not sent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NotePatch<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<&'a str>,
}

impl<'a> From<&'a NoteUpdate> for NotePatch<'a> {
    fn from(update: &'a NoteUpdate) -> Self {
        Self {
            title: update.title.as_deref(),
            content: update.content.as_deref(),
        }
    }
}

impl From<WorkspaceRow> for Workspace {
    fn from(row: WorkspaceRow) -> Self {
        Workspace {
            id: row.id,
            name: row.name,
            description: row.description,
            created_at: row.created_at,
            folders: Vec::new(),
        }
    }
}

impl From<FolderRow> for Folder {
    fn from(row: FolderRow) -> Self {
        Folder {
            id: row.id,
            name: row.name,
            created_at: row.created_at,
            workspace_id: row.workspace_id,
            notes: Vec::new(),
        }
    }
}

impl From<NoteRow> for Note {
    fn from(row: NoteRow) -> Self {
        Note {
            id: row.id,
            title: row.title,
            content: row.content.unwrap_or_default(),
            created_at: row.created_at,
            updated_at: row.updated_at,
            folder_id: row.folder_id,
        }
    }
}

/// Decodes a raw row returned by the backend.
pub fn decode_row<T: DeserializeOwned>(table: Table, row: Value) -> Result<T> {
    serde_json::from_value(row).map_err(|e| NotesError::InvalidRow {
        table: table.name().to_string(),
        message: e.to_string(),
    })
}

/// Decodes every row of a select result.
pub fn decode_rows<T: DeserializeOwned>(table: Table, rows: Vec<Value>) -> Result<Vec<T>> {
    rows.into_iter().map(|row| decode_row(table, row)).collect()
}

/// Encodes a write payload.
pub fn encode_row<T: Serialize>(row: &T) -> Result<Value> {
    Ok(serde_json::to_value(row)?)
}
