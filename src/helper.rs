use std::{
    fs,
    io::{ErrorKind, Write},
    path::Path,
};

use log::{debug, error, trace};
use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;

use crate::{NotesError, Result};

/// Reads and parses a JSON file. A missing file yields `None`.
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    debug!("Loading JSON from file: {}", path.display());
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            trace!("{} does not exist yet", path.display());
            return Ok(None);
        }
        Err(e) => {
            error!("Failed to open file {}: {}", path.display(), e);
            return Err(NotesError::Io(e));
        }
    };

    let value = serde_json::from_str(&content).map_err(|e| {
        error!("Failed to parse {}: {}", path.display(), e);
        NotesError::Serialization(e)
    })?;
    Ok(Some(value))
}

/// Writes `value` as pretty JSON through a temporary file in the same
/// directory, then moves it over `path`.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    if !dir.exists() {
        debug!("Creating parent directory: {}", dir.display());
        fs::create_dir_all(dir).map_err(|e| {
            error!("Failed to create directory {}: {}", dir.display(), e);
            NotesError::DirectoryError {
                path: dir.to_path_buf(),
            }
        })?;
    }

    let mut temp_file = NamedTempFile::new_in(dir).map_err(|e| {
        error!("Failed to create temporary file: {}", e);
        NotesError::Io(e)
    })?;

    let json = serde_json::to_string_pretty(value)?;
    temp_file.write_all(json.as_bytes())?;
    temp_file.flush()?;

    temp_file.persist(path).map_err(|e| {
        error!("Failed to persist file {}: {}", path.display(), e.error);
        NotesError::Io(e.error)
    })?;

    trace!("Wrote {}", path.display());
    Ok(())
}

/// Trims a user-entered name; empty names are rejected.
pub fn trim_name(input: &str, what: &str) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(NotesError::InvalidInput {
            message: format!("{} cannot be empty", what),
        });
    }
    Ok(trimmed.to_string())
}

/// First line of `content`, cut to `max_len` characters.
pub fn content_preview(content: &str, max_len: usize) -> String {
    let first_line = content.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    if first_line.chars().count() <= max_len {
        first_line.to_string()
    } else {
        let cut: String = first_line.chars().take(max_len).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Option<Vec<String>> = load_json_file(&dir.path().join("nope.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn atomic_write_creates_parent_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rows.json");
        write_json_atomic(&path, &vec!["a", "b"]).unwrap();

        let loaded: Vec<String> = load_json_file(&path).unwrap().unwrap();
        assert_eq!(loaded, ["a", "b"]);
    }

    #[test]
    fn corrupt_file_is_a_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{not json").unwrap();
        let err = load_json_file::<Vec<String>>(&path).unwrap_err();
        assert!(matches!(err, NotesError::Serialization(_)));
    }

    #[test]
    fn trim_name_rejects_blank() {
        assert_eq!(trim_name("  Personal ", "Workspace name").unwrap(), "Personal");
        assert!(matches!(
            trim_name("   ", "Workspace name"),
            Err(NotesError::InvalidInput { .. })
        ));
    }

    #[test]
    fn preview_skips_blank_lines_and_truncates() {
        assert_eq!(content_preview("\n\nhello world\nmore", 100), "hello world");
        assert_eq!(content_preview("abcdef", 3), "abc...");
        assert_eq!(content_preview("", 10), "");
    }
}
