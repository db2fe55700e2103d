#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, oneshot};
use wsnotes::{
    AuthClient, ChannelNotifier, Notification, NotesError, NotesStore, Query, RemoteStore, Result,
    StoreState, Table, User,
};

/// In-memory table store with failure injection
#[derive(Default)]
pub struct MockRemote {
    tables: Mutex<HashMap<Table, Vec<Value>>>,
    next_id: AtomicUsize,
    pub fail_selects: AtomicBool,
    pub fail_inserts: AtomicBool,
    pub fail_updates: AtomicBool,
    pub fail_deletes: AtomicBool,
    /// Operations received, as `"op table"`
    pub calls: Mutex<Vec<String>>,
    held_select: Mutex<Option<(oneshot::Sender<()>, oneshot::Receiver<()>)>>,
}

impl MockRemote {
    /// Makes the next workspace select take its rows, report that it
    /// started, and wait for the release signal before returning them.
    pub fn hold_next_select(&self) -> (oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        *self.held_select.lock().unwrap() = Some((entered_tx, release_rx));
        (entered_rx, release_tx)
    }

    pub fn rows(&self, table: Table) -> Vec<Value> {
        self.tables
            .lock()
            .unwrap()
            .get(&table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn calls_to(&self, op: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(op))
            .count()
    }

    fn record(&self, op: &str, table: Table) {
        self.calls.lock().unwrap().push(format!("{} {}", op, table));
    }

    fn stamp(&self) -> (String, DateTime<Utc>) {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let created = base_time() + chrono::Duration::seconds(n as i64);
        (format!("id-{}", n), created)
    }
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn injected(flag: &AtomicBool, table: Table) -> Result<()> {
    if flag.load(Ordering::SeqCst) {
        return Err(NotesError::remote(table.name(), "injected failure"));
    }
    Ok(())
}

#[async_trait]
impl RemoteStore for MockRemote {
    async fn select(&self, query: Query) -> Result<Vec<Value>> {
        self.record("select", query.table);
        injected(&self.fail_selects, query.table)?;

        let rows: Vec<Value> = self
            .rows(query.table)
            .into_iter()
            .filter(|row| query.matches(row))
            .collect();

        if query.table == Table::Workspaces {
            let held = self.held_select.lock().unwrap().take();
            if let Some((entered, release)) = held {
                let _ = entered.send(());
                let _ = release.await;
            }
        }
        Ok(rows)
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value> {
        self.record("insert", table);
        injected(&self.fail_inserts, table)?;

        let (id, created) = self.stamp();
        let mut row = row;
        let fields = row
            .as_object_mut()
            .ok_or_else(|| NotesError::remote(table.name(), "not an object"))?;
        fields.insert("id".to_string(), json!(id));
        fields.insert("created_at".to_string(), json!(created));
        if table == Table::Notes {
            fields.insert("updated_at".to_string(), json!(created));
        }

        self.tables
            .lock()
            .unwrap()
            .entry(table)
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    async fn update(&self, table: Table, id: &str, patch: Value) -> Result<()> {
        self.record("update", table);
        injected(&self.fail_updates, table)?;

        let mut tables = self.tables.lock().unwrap();
        if let Some(row) = tables
            .entry(table)
            .or_default()
            .iter_mut()
            .find(|r| r["id"] == id)
        {
            if let (Some(fields), Some(changes)) = (row.as_object_mut(), patch.as_object()) {
                for (key, value) in changes {
                    fields.insert(key.clone(), value.clone());
                }
                fields.insert("updated_at".to_string(), json!(Utc::now()));
            }
        }
        Ok(())
    }

    async fn delete(&self, table: Table, id: &str) -> Result<()> {
        self.record("delete", table);
        injected(&self.fail_deletes, table)?;

        let mut tables = self.tables.lock().unwrap();
        let mut folder_ids = Vec::new();
        match table {
            Table::Workspaces => {
                let folders = tables.entry(Table::Folders).or_default();
                folder_ids = folders
                    .iter()
                    .filter(|f| f["workspace_id"] == id)
                    .filter_map(|f| f["id"].as_str().map(str::to_string))
                    .collect();
                folders.retain(|f| f["workspace_id"] != id);
            }
            Table::Folders => folder_ids.push(id.to_string()),
            Table::Notes => {}
        }
        tables
            .entry(Table::Notes)
            .or_default()
            .retain(|n| !folder_ids.iter().any(|f| n["folder_id"] == f.as_str()));
        tables.entry(table).or_default().retain(|r| r["id"] != id);
        Ok(())
    }
}

/// Auth backend whose sign-in completes immediately
pub struct MockAuth {
    user: Mutex<Option<User>>,
    changes: broadcast::Sender<Option<User>>,
    pub fail_sign_in: AtomicBool,
    pub fail_sign_out: AtomicBool,
}

impl MockAuth {
    pub fn new(user: Option<User>) -> Self {
        let (changes, _) = broadcast::channel(8);
        Self {
            user: Mutex::new(user),
            changes,
            fail_sign_in: AtomicBool::new(false),
            fail_sign_out: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl AuthClient for MockAuth {
    async fn current_user(&self) -> Result<Option<User>> {
        Ok(self.user.lock().unwrap().clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<Option<User>> {
        self.changes.subscribe()
    }

    async fn sign_in_with_provider(&self, _provider: &str) -> Result<Option<String>> {
        if self.fail_sign_in.load(Ordering::SeqCst) {
            return Err(NotesError::Auth {
                message: "provider unavailable".to_string(),
            });
        }
        let user = test_user();
        *self.user.lock().unwrap() = Some(user.clone());
        let _ = self.changes.send(Some(user));
        Ok(None)
    }

    async fn sign_out(&self) -> Result<()> {
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(NotesError::Auth {
                message: "network unreachable".to_string(),
            });
        }
        *self.user.lock().unwrap() = None;
        let _ = self.changes.send(None);
        Ok(())
    }
}

pub fn test_user() -> User {
    User {
        id: "user-1".to_string(),
        email: Some("ada@example.com".to_string()),
    }
}

pub struct Harness {
    pub store: NotesStore,
    pub remote: Arc<MockRemote>,
    pub auth: Arc<MockAuth>,
    pub notifications: mpsc::UnboundedReceiver<Notification>,
}

impl Harness {
    pub fn new(user: Option<User>) -> Self {
        let remote = Arc::new(MockRemote::default());
        let auth = Arc::new(MockAuth::new(user));
        let (notifier, notifications) = ChannelNotifier::new();
        let store = NotesStore::new(remote.clone(), auth.clone(), Arc::new(notifier), "github");
        Self {
            store,
            remote,
            auth,
            notifications,
        }
    }

    /// Harness with a signed-in user and an initialized store
    pub async fn signed_in() -> Self {
        let harness = Self::new(Some(test_user()));
        harness.store.initialize().await.unwrap();
        harness
    }

    /// Notifications published so far
    pub fn drain(&mut self) -> Vec<Notification> {
        let mut seen = Vec::new();
        while let Ok(n) = self.notifications.try_recv() {
            seen.push(n);
        }
        seen
    }

    pub async fn seed_workspace(&self, name: &str) -> String {
        let row = self
            .remote
            .insert(Table::Workspaces, json!({"name": name, "user_id": "user-1"}))
            .await
            .unwrap();
        row["id"].as_str().unwrap().to_string()
    }

    pub async fn seed_folder(&self, workspace_id: &str, name: &str) -> String {
        let row = self
            .remote
            .insert(
                Table::Folders,
                json!({"name": name, "workspace_id": workspace_id, "user_id": "user-1"}),
            )
            .await
            .unwrap();
        row["id"].as_str().unwrap().to_string()
    }

    pub async fn seed_note(&self, folder_id: &str, title: &str) -> String {
        let row = self
            .remote
            .insert(
                Table::Notes,
                json!({"title": title, "content": "", "folder_id": folder_id, "user_id": "user-1"}),
            )
            .await
            .unwrap();
        row["id"].as_str().unwrap().to_string()
    }

    /// Waits until the published state satisfies `condition`.
    pub async fn wait_for<F>(&self, condition: F) -> StoreState
    where
        F: Fn(&StoreState) -> bool,
    {
        let mut rx = self.store.subscribe();
        let state = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| condition(s)))
            .await
            .expect("state never reached")
            .expect("store dropped")
            .clone();
        state
    }
}
