//! Immutable rebuilds of the workspace tree.
//!
//! Every mutation of the store produces a fresh `Vec<Workspace>` from the
//! previous one; nothing here touches the input.
use chrono::{DateTime, Utc};

use crate::{Folder, Note, NoteUpdate, Selection, Workspace};

/// Appends a workspace at the end.
pub fn append_workspace(workspaces: &[Workspace], workspace: Workspace) -> Vec<Workspace> {
    let mut next = workspaces.to_vec();
    next.push(workspace);
    next
}

/// Appends a folder to the workspace it belongs to.
pub fn append_folder(workspaces: &[Workspace], folder: Folder) -> Vec<Workspace> {
    workspaces
        .iter()
        .map(|workspace| {
            if workspace.id == folder.workspace_id {
                let mut folders = workspace.folders.clone();
                folders.push(folder.clone());
                Workspace {
                    folders,
                    ..workspace.clone()
                }
            } else {
                workspace.clone()
            }
        })
        .collect()
}

/// Appends a note to the folder it belongs to, wherever that folder lives.
pub fn append_note(workspaces: &[Workspace], note: Note) -> Vec<Workspace> {
    map_folders(workspaces, |folder| {
        if folder.id == note.folder_id {
            let mut notes = folder.notes.clone();
            notes.push(note.clone());
            Folder {
                notes,
                ..folder.clone()
            }
        } else {
            folder.clone()
        }
    })
}

/// Applies the supplied fields of `update` to the matching note and moves
/// its `updated_at` to `now`, never backwards.
pub fn patch_note(
    workspaces: &[Workspace],
    note_id: &str,
    update: &NoteUpdate,
    now: DateTime<Utc>,
) -> Vec<Workspace> {
    map_folders(workspaces, |folder| Folder {
        notes: folder
            .notes
            .iter()
            .map(|note| {
                if note.id != note_id {
                    return note.clone();
                }
                let mut patched = note.clone();
                if let Some(title) = &update.title {
                    patched.title = title.clone();
                }
                if let Some(content) = &update.content {
                    patched.content = content.clone();
                }
                patched.updated_at = now.max(note.updated_at);
                patched
            })
            .collect(),
        ..folder.clone()
    })
}

pub fn remove_note(workspaces: &[Workspace], note_id: &str) -> Vec<Workspace> {
    map_folders(workspaces, |folder| Folder {
        notes: folder
            .notes
            .iter()
            .filter(|note| note.id != note_id)
            .cloned()
            .collect(),
        ..folder.clone()
    })
}

/// Removes a folder; its notes go with it.
pub fn remove_folder(workspaces: &[Workspace], folder_id: &str) -> Vec<Workspace> {
    workspaces
        .iter()
        .map(|workspace| Workspace {
            folders: workspace
                .folders
                .iter()
                .filter(|folder| folder.id != folder_id)
                .cloned()
                .collect(),
            ..workspace.clone()
        })
        .collect()
}

pub fn remove_workspace(workspaces: &[Workspace], workspace_id: &str) -> Vec<Workspace> {
    workspaces
        .iter()
        .filter(|workspace| workspace.id != workspace_id)
        .cloned()
        .collect()
}

/// Default cursor for a freshly loaded tree: first workspace, its first
/// folder, that folder's first note, descending only while collections are
/// non-empty.
pub fn default_selection(workspaces: &[Workspace]) -> Selection {
    let mut selection = Selection::default();
    let Some(workspace) = workspaces.first() else {
        return selection;
    };
    selection.workspace_id = workspace.id.clone();

    if let Some(folder) = workspace.folders.first() {
        selection.folder_id = folder.id.clone();
        if let Some(note) = folder.notes.first() {
            selection.note_id = note.id.clone();
        }
    }
    selection
}

/// Keeps every workspace and folder, and only the notes matching `query`.
pub fn filter_notes(workspaces: &[Workspace], query: &str) -> Vec<Workspace> {
    map_folders(workspaces, |folder| Folder {
        notes: folder
            .notes
            .iter()
            .filter(|note| note.matches(query))
            .cloned()
            .collect(),
        ..folder.clone()
    })
}

/// Finds a note anywhere in the tree.
pub fn find_note<'a>(workspaces: &'a [Workspace], note_id: &str) -> Option<&'a Note> {
    workspaces
        .iter()
        .flat_map(|w| w.folders.iter())
        .find_map(|f| f.note(note_id))
}

pub fn find_folder<'a>(workspaces: &'a [Workspace], folder_id: &str) -> Option<&'a Folder> {
    workspaces.iter().find_map(|w| w.folder(folder_id))
}

fn map_folders<F>(workspaces: &[Workspace], f: F) -> Vec<Workspace>
where
    F: Fn(&Folder) -> Folder,
{
    workspaces
        .iter()
        .map(|workspace| Workspace {
            folders: workspace.folders.iter().map(&f).collect(),
            ..workspace.clone()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn ts(offset: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 + offset, 0).unwrap()
    }

    fn note(id: &str, folder_id: &str, title: &str) -> Note {
        Note {
            id: id.to_string(),
            title: title.to_string(),
            content: String::new(),
            created_at: ts(0),
            updated_at: ts(0),
            folder_id: folder_id.to_string(),
        }
    }

    fn folder(id: &str, workspace_id: &str, notes: Vec<Note>) -> Folder {
        Folder {
            id: id.to_string(),
            name: id.to_uppercase(),
            created_at: ts(0),
            workspace_id: workspace_id.to_string(),
            notes,
        }
    }

    fn workspace(id: &str, folders: Vec<Folder>) -> Workspace {
        Workspace {
            id: id.to_string(),
            name: id.to_uppercase(),
            description: None,
            created_at: ts(0),
            folders,
        }
    }

    fn sample() -> Vec<Workspace> {
        vec![
            workspace(
                "w1",
                vec![
                    folder("f1", "w1", vec![note("n1", "f1", "Welcome"), note("n2", "f1", "Plans")]),
                    folder("f2", "w1", vec![]),
                ],
            ),
            workspace("w2", vec![folder("f3", "w2", vec![note("n3", "f3", "Standup")])]),
        ]
    }

    #[test]
    fn append_folder_targets_owning_workspace_only() {
        let tree = append_folder(&sample(), folder("f4", "w2", vec![]));
        assert_eq!(tree[0].folders.len(), 2);
        let ids: Vec<_> = tree[1].folders.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, ["f3", "f4"]);
    }

    #[test]
    fn append_note_goes_last_in_its_folder() {
        let tree = append_note(&sample(), note("n9", "f1", "Later"));
        let ids: Vec<_> = tree[0].folders[0].notes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["n1", "n2", "n9"]);
    }

    #[test]
    fn patch_note_touches_only_supplied_fields() {
        let mut tree = sample();
        tree[0].folders[0].notes[0].content = "body".to_string();

        let next = patch_note(&tree, "n1", &NoteUpdate::title("Hello"), ts(60));
        let patched = find_note(&next, "n1").unwrap();
        assert_eq!(patched.title, "Hello");
        assert_eq!(patched.content, "body");
        assert_eq!(patched.updated_at, ts(60));
        // input untouched
        assert_eq!(find_note(&tree, "n1").unwrap().title, "Welcome");
    }

    #[test]
    fn patch_note_never_moves_updated_at_backwards() {
        let next = patch_note(&sample(), "n1", &NoteUpdate::content("x"), ts(0) - Duration::seconds(5));
        assert_eq!(find_note(&next, "n1").unwrap().updated_at, ts(0));
    }

    #[test]
    fn patch_unknown_note_is_a_no_op() {
        let tree = sample();
        assert_eq!(patch_note(&tree, "missing", &NoteUpdate::title("x"), ts(9)), tree);
    }

    #[test]
    fn remove_folder_drops_its_notes() {
        let tree = remove_folder(&sample(), "f1");
        assert!(find_note(&tree, "n1").is_none());
        assert!(find_note(&tree, "n3").is_some());
        assert_eq!(tree[0].folders.len(), 1);
    }

    #[test]
    fn remove_workspace_and_note() {
        let tree = remove_workspace(&sample(), "w1");
        assert_eq!(tree.len(), 1);
        let tree = remove_note(&tree, "n3");
        assert!(tree[0].folders[0].notes.is_empty());
    }

    #[test]
    fn default_selection_descends_while_non_empty() {
        let selection = default_selection(&sample());
        assert_eq!(selection.workspace_id, "w1");
        assert_eq!(selection.folder_id, "f1");
        assert_eq!(selection.note_id, "n1");

        let empty_folder = vec![workspace("w1", vec![folder("f1", "w1", vec![])])];
        let selection = default_selection(&empty_folder);
        assert_eq!(selection.folder_id, "f1");
        assert_eq!(selection.note_id, "");

        assert!(default_selection(&[]).is_empty());
    }

    #[test]
    fn filter_keeps_containers_and_matching_notes() {
        let tree = filter_notes(&sample(), "STAND");
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].folders.len(), 2);
        assert!(tree[0].folders[0].notes.is_empty());
        assert_eq!(tree[1].folders[0].notes[0].id, "n3");

        assert_eq!(filter_notes(&sample(), ""), sample());
    }
}
