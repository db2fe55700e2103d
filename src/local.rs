//! File-backed backend.
//!
//! Each table is one JSON array under the data directory. The backend plays
//! the server's part: it assigns ids and timestamps, checks that parents
//! exist, and cascades deletes down the tree.
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use log::{debug, info, trace, warn};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use crate::{
    load_json_file, write_json_atomic, AuthClient, NotesError, Query, RemoteStore, Result, Table,
    User,
};

const SESSION_FILE: &str = "session.json";

/// Local stand-in for the hosted table store
pub struct LocalBackend {
    data_dir: PathBuf,
    /// Tables loaded so far, indexed by table
    tables: Mutex<HashMap<Table, Vec<Value>>>,
}

impl LocalBackend {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        info!("Using local backend at {}", data_dir.display());
        Self {
            data_dir,
            tables: Mutex::new(HashMap::new()),
        }
    }

    fn table_path(&self, table: Table) -> PathBuf {
        self.data_dir.join(format!("{}.json", table.name()))
    }

    /// Makes sure `table` is in the cache, reading its file on first use.
    fn ensure_loaded(&self, tables: &mut HashMap<Table, Vec<Value>>, table: Table) -> Result<()> {
        if tables.contains_key(&table) {
            return Ok(());
        }
        let rows: Vec<Value> = load_json_file(&self.table_path(table))?.unwrap_or_default();
        debug!("Loaded {} rows from {}", rows.len(), table);
        tables.insert(table, rows);
        Ok(())
    }

    /// Writes `rows` to the table file. Callers swap them into the cache
    /// only after this succeeds.
    fn persist(&self, table: Table, rows: &[Value]) -> Result<()> {
        write_json_atomic(&self.table_path(table), rows)
    }

    fn rows_of(tables: &HashMap<Table, Vec<Value>>, table: Table) -> Vec<Value> {
        tables.get(&table).cloned().unwrap_or_default()
    }

    fn parent_exists(tables: &HashMap<Table, Vec<Value>>, table: Table, id: &str) -> bool {
        tables
            .get(&table)
            .is_some_and(|rows| rows.iter().any(|row| row_id(row) == Some(id)))
    }
}

fn row_id(row: &Value) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

fn created_at(row: &Value) -> &str {
    row.get("created_at").and_then(Value::as_str).unwrap_or("")
}

fn now_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn into_object(table: Table, value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(NotesError::remote(
            table.name(),
            format!("expected a JSON object, got {}", other),
        )),
    }
}

#[async_trait]
impl RemoteStore for LocalBackend {
    async fn select(&self, query: Query) -> Result<Vec<Value>> {
        let mut tables = self.tables.lock().await;
        self.ensure_loaded(&mut tables, query.table)?;

        let mut rows: Vec<Value> = tables
            .get(&query.table)
            .map(|rows| rows.iter().filter(|row| query.matches(row)).cloned().collect())
            .unwrap_or_default();
        // stable: equal timestamps keep insertion order
        rows.sort_by(|a, b| created_at(a).cmp(created_at(b)));

        trace!("Selected {} rows from {}", rows.len(), query.table);
        Ok(rows)
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value> {
        let mut object = into_object(table, row)?;
        let mut tables = self.tables.lock().await;
        for t in Table::all() {
            self.ensure_loaded(&mut tables, t)?;
        }

        let parent = match table {
            Table::Workspaces => None,
            Table::Folders => Some((Table::Workspaces, "workspace_id")),
            Table::Notes => Some((Table::Folders, "folder_id")),
        };
        if let Some((parent_table, column)) = parent {
            let parent_id = object.get(column).and_then(Value::as_str).unwrap_or("");
            if !Self::parent_exists(&tables, parent_table, parent_id) {
                warn!("Rejected {} row: unknown {} '{}'", table, column, parent_id);
                return Err(NotesError::remote(
                    table.name(),
                    format!("insert violates foreign key constraint on {}", column),
                ));
            }
        }

        let now = now_string();
        object.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
        object.insert("created_at".to_string(), Value::String(now.clone()));
        if table == Table::Notes {
            object.insert("updated_at".to_string(), Value::String(now));
        }

        let stored = Value::Object(object);
        let mut rows = Self::rows_of(&tables, table);
        rows.push(stored.clone());
        self.persist(table, &rows)?;
        tables.insert(table, rows);

        debug!("Inserted {} row {}", table, row_id(&stored).unwrap_or(""));
        Ok(stored)
    }

    async fn update(&self, table: Table, id: &str, patch: Value) -> Result<()> {
        let patch = into_object(table, patch)?;
        let mut tables = self.tables.lock().await;
        self.ensure_loaded(&mut tables, table)?;

        let mut rows = Self::rows_of(&tables, table);
        let Some(Value::Object(target)) = rows.iter_mut().find(|row| row_id(row) == Some(id))
        else {
            debug!("Update on {} matched no row for id {}", table, id);
            return Ok(());
        };

        for (column, value) in patch {
            if column == "id" || column == "created_at" {
                continue;
            }
            target.insert(column, value);
        }
        if table == Table::Notes {
            target.insert("updated_at".to_string(), Value::String(now_string()));
        }

        self.persist(table, &rows)?;
        tables.insert(table, rows);
        debug!("Updated {} row {}", table, id);
        Ok(())
    }

    async fn delete(&self, table: Table, id: &str) -> Result<()> {
        let mut tables = self.tables.lock().await;
        for t in Table::all() {
            self.ensure_loaded(&mut tables, t)?;
        }

        let folder_ids: Vec<String> = match table {
            Table::Workspaces => Self::rows_of(&tables, Table::Folders)
                .iter()
                .filter(|f| f.get("workspace_id").and_then(Value::as_str) == Some(id))
                .filter_map(|f| row_id(f).map(str::to_string))
                .collect(),
            Table::Folders => vec![id.to_string()],
            Table::Notes => Vec::new(),
        };

        // children before parents: a partial write leaves no orphans on disk
        let mut updated: Vec<(Table, Vec<Value>)> = Vec::new();
        if !folder_ids.is_empty() || table == Table::Notes {
            let mut notes = Self::rows_of(&tables, Table::Notes);
            notes.retain(|n| {
                let in_deleted_folder = n
                    .get("folder_id")
                    .and_then(Value::as_str)
                    .is_some_and(|folder_id| folder_ids.iter().any(|f| f == folder_id));
                !in_deleted_folder && (table != Table::Notes || row_id(n) != Some(id))
            });
            updated.push((Table::Notes, notes));
        }
        if table != Table::Notes {
            let mut folders = Self::rows_of(&tables, Table::Folders);
            folders.retain(|f| {
                row_id(f).map_or(true, |folder_id| !folder_ids.iter().any(|d| d == folder_id))
            });
            updated.push((Table::Folders, folders));
        }
        if table == Table::Workspaces {
            let mut workspaces = Self::rows_of(&tables, Table::Workspaces);
            workspaces.retain(|w| row_id(w) != Some(id));
            updated.push((Table::Workspaces, workspaces));
        }

        for (t, rows) in &updated {
            self.persist(*t, rows)?;
        }
        for (t, rows) in updated {
            tables.insert(t, rows);
        }
        debug!("Deleted {} row {}", table, id);
        Ok(())
    }
}

/// Single-identity auth for the local backend
pub struct LocalAuth {
    session_path: PathBuf,
    username: String,
    changes: broadcast::Sender<Option<User>>,
}

impl LocalAuth {
    pub fn new(data_dir: &Path, username: impl Into<String>) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            session_path: data_dir.join(SESSION_FILE),
            username: username.into(),
            changes,
        }
    }

    fn publish(&self, user: Option<User>) {
        // no listener is fine
        let _ = self.changes.send(user);
    }
}

#[async_trait]
impl AuthClient for LocalAuth {
    async fn current_user(&self) -> Result<Option<User>> {
        load_json_file(&self.session_path)
    }

    fn subscribe(&self) -> broadcast::Receiver<Option<User>> {
        self.changes.subscribe()
    }

    async fn sign_in_with_provider(&self, provider: &str) -> Result<Option<String>> {
        info!(
            "Local sign-in as '{}' (provider '{}' not contacted)",
            self.username, provider
        );
        let user = User {
            id: self.username.clone(),
            email: None,
        };
        write_json_atomic(&self.session_path, &user).map_err(|e| NotesError::Auth {
            message: e.to_string(),
        })?;
        self.publish(Some(user));
        Ok(None)
    }

    async fn sign_out(&self) -> Result<()> {
        match std::fs::remove_file(&self.session_path) {
            Ok(()) => debug!("Removed {}", self.session_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(NotesError::Auth {
                    message: e.to_string(),
                })
            }
        }
        self.publish(None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    async fn seeded(dir: &Path) -> (LocalBackend, String, String) {
        let backend = LocalBackend::new(dir);
        let ws = backend
            .insert(Table::Workspaces, json!({"name": "Personal", "user_id": "u"}))
            .await
            .unwrap();
        let ws_id = row_id(&ws).unwrap().to_string();
        let folder = backend
            .insert(
                Table::Folders,
                json!({"name": "Journal", "workspace_id": ws_id, "user_id": "u"}),
            )
            .await
            .unwrap();
        let folder_id = row_id(&folder).unwrap().to_string();
        (backend, ws_id, folder_id)
    }

    #[tokio::test]
    async fn insert_assigns_id_and_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, _, folder_id) = seeded(dir.path()).await;

        let note = backend
            .insert(
                Table::Notes,
                json!({"title": "t", "content": "", "folder_id": folder_id, "user_id": "u"}),
            )
            .await
            .unwrap();
        assert!(row_id(&note).is_some());
        assert_eq!(note["created_at"], note["updated_at"]);
    }

    #[tokio::test]
    async fn insert_rejects_unknown_parent() {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());
        let err = backend
            .insert(Table::Folders, json!({"name": "x", "workspace_id": "nope"}))
            .await
            .unwrap_err();
        assert!(matches!(err, NotesError::Remote { .. }));
    }

    #[tokio::test]
    async fn select_filters_and_keeps_creation_order() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, ws_id, _) = seeded(dir.path()).await;
        backend
            .insert(Table::Folders, json!({"name": "Ideas", "workspace_id": ws_id}))
            .await
            .unwrap();

        let rows = backend
            .select(Query::eq(Table::Folders, "workspace_id", ws_id.as_str()))
            .await
            .unwrap();
        let names: Vec<_> = rows.iter().map(|r| r["name"].as_str().unwrap()).collect();
        assert_eq!(names, ["Journal", "Ideas"]);

        let none = backend
            .select(Query::eq(Table::Folders, "workspace_id", "other"))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn update_merges_columns_and_refreshes_updated_at() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, _, folder_id) = seeded(dir.path()).await;
        let note = backend
            .insert(
                Table::Notes,
                json!({"title": "t", "content": "body", "folder_id": folder_id}),
            )
            .await
            .unwrap();
        let id = row_id(&note).unwrap();

        backend
            .update(Table::Notes, id, json!({"title": "renamed"}))
            .await
            .unwrap();
        let rows = backend.select(Query::all(Table::Notes)).await.unwrap();
        assert_eq!(rows[0]["title"], "renamed");
        assert_eq!(rows[0]["content"], "body");
        assert!(rows[0]["updated_at"].as_str() >= note["updated_at"].as_str());

        // zero matched rows is not an error
        backend
            .update(Table::Notes, "missing", json!({"title": "x"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn deleting_workspace_cascades_to_folders_and_notes() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, ws_id, folder_id) = seeded(dir.path()).await;
        backend
            .insert(Table::Notes, json!({"title": "t", "folder_id": folder_id}))
            .await
            .unwrap();

        backend.delete(Table::Workspaces, &ws_id).await.unwrap();
        for table in Table::all() {
            assert!(backend.select(Query::all(table)).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn deleting_folder_cascades_to_notes_only() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, _, folder_id) = seeded(dir.path()).await;
        backend
            .insert(Table::Notes, json!({"title": "t", "folder_id": folder_id}))
            .await
            .unwrap();

        backend.delete(Table::Folders, &folder_id).await.unwrap();
        assert_eq!(backend.select(Query::all(Table::Workspaces)).await.unwrap().len(), 1);
        assert!(backend.select(Query::all(Table::Notes)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rows_survive_a_new_backend_instance() {
        let dir = tempfile::tempdir().unwrap();
        let (_, ws_id, _) = seeded(dir.path()).await;

        let reopened = LocalBackend::new(dir.path());
        let rows = reopened.select(Query::all(Table::Workspaces)).await.unwrap();
        assert_eq!(row_id(&rows[0]), Some(ws_id.as_str()));
    }

    /// Replaces a table file with a non-empty directory so writes to it fail.
    fn block_table(dir: &Path, table: Table) {
        let path = dir.join(format!("{}.json", table.name()));
        if path.is_file() {
            std::fs::remove_file(&path).unwrap();
        }
        std::fs::create_dir_all(path.join("occupied")).unwrap();
    }

    #[tokio::test]
    async fn failed_write_does_not_cache_inserted_row() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, _, folder_id) = seeded(dir.path()).await;
        block_table(dir.path(), Table::Notes);

        let result = backend
            .insert(Table::Notes, json!({"title": "t", "folder_id": folder_id}))
            .await;

        assert!(result.is_err());
        assert!(backend.select(Query::all(Table::Notes)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_write_keeps_cached_row_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, _, folder_id) = seeded(dir.path()).await;
        let note = backend
            .insert(Table::Notes, json!({"title": "before", "folder_id": folder_id}))
            .await
            .unwrap();
        block_table(dir.path(), Table::Notes);

        let result = backend
            .update(Table::Notes, row_id(&note).unwrap(), json!({"title": "after"}))
            .await;

        assert!(result.is_err());
        let rows = backend.select(Query::all(Table::Notes)).await.unwrap();
        assert_eq!(rows[0]["title"], "before");
    }

    #[tokio::test]
    async fn failed_cascade_keeps_every_table_cached() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, ws_id, folder_id) = seeded(dir.path()).await;
        backend
            .insert(Table::Notes, json!({"title": "t", "folder_id": folder_id}))
            .await
            .unwrap();
        block_table(dir.path(), Table::Workspaces);

        assert!(backend.delete(Table::Workspaces, &ws_id).await.is_err());

        for table in Table::all() {
            assert_eq!(backend.select(Query::all(table)).await.unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn local_auth_session_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let auth = LocalAuth::new(dir.path(), "alice");
        let mut changes = auth.subscribe();

        assert!(auth.current_user().await.unwrap().is_none());

        assert_eq!(auth.sign_in_with_provider("github").await.unwrap(), None);
        let user = auth.current_user().await.unwrap().unwrap();
        assert_eq!(user.id, "alice");
        assert_eq!(changes.recv().await.unwrap(), Some(user));

        auth.sign_out().await.unwrap();
        assert!(auth.current_user().await.unwrap().is_none());
        assert_eq!(changes.recv().await.unwrap(), None);
    }
}
