//! Core data structures for the wsnotes application.
//!
//! The in-memory tree: workspaces own folders, folders own notes. Children
//! are kept in creation order. Serialized with camelCase keys, the shape the
//! front end renders.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Top-level container owned by a single user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    /// Server-assigned identifier
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Folders in ascending creation order
    #[serde(default)]
    pub folders: Vec<Folder>,
}

/// Mid-level container inside a workspace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Owning workspace
    pub workspace_id: String,
    /// Notes in ascending creation order
    #[serde(default)]
    pub notes: Vec<Note>,
}

/// Leaf text document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub title: String,
    /// Free text, may be empty
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Last title/content change
    pub updated_at: DateTime<Utc>,
    /// Owning folder
    pub folder_id: String,
}

impl Workspace {
    /// Total number of notes across all folders
    pub fn note_count(&self) -> usize {
        self.folders.iter().map(|f| f.notes.len()).sum()
    }

    pub fn folder(&self, folder_id: &str) -> Option<&Folder> {
        self.folders.iter().find(|f| f.id == folder_id)
    }
}

impl Folder {
    pub fn note(&self, note_id: &str) -> Option<&Note> {
        self.notes.iter().find(|n| n.id == note_id)
    }
}

impl Note {
    /// Case-insensitive substring match on title or content.
    ///
    /// An empty query matches every note.
    pub fn matches(&self, query: &str) -> bool {
        if query.is_empty() {
            return true;
        }
        let query = query.to_lowercase();
        self.title.to_lowercase().contains(&query) || self.content.to_lowercase().contains(&query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(title: &str, content: &str) -> Note {
        let now = Utc::now();
        Note {
            id: "n1".to_string(),
            title: title.to_string(),
            content: content.to_string(),
            created_at: now,
            updated_at: now,
            folder_id: "f1".to_string(),
        }
    }

    #[test]
    fn matches_is_case_insensitive_on_title_and_content() {
        let n = note("Meeting Notes", "Discuss the Roadmap");
        assert!(n.matches("meeting"));
        assert!(n.matches("ROADMAP"));
        assert!(!n.matches("budget"));
    }

    #[test]
    fn empty_query_matches_everything() {
        assert!(note("", "").matches(""));
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let value = serde_json::to_value(note("t", "c")).unwrap();
        assert!(value.get("folderId").is_some());
        assert!(value.get("updatedAt").is_some());
        assert!(value.get("folder_id").is_none());
    }
}
