use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use log::{debug, error, info, trace, warn};
use serde::{de::DeserializeOwned, Serialize};
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};

use crate::{
    decode_row, decode_rows, encode_row, tree, AuthClient, AuthStatus, Folder, FolderRow,
    NewFolderRow, NewNoteRow, NewWorkspaceRow, Note, NotePatch, NoteRow, NoteUpdate, NotesError,
    Notification, Notifier, Query, RemoteStore, Result, Selection, Table, User, Workspace,
    WorkspaceRow,
};

/// Identity provider used when none is configured
pub const DEFAULT_PROVIDER: &str = "github";

/// Snapshot of everything the front end renders.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreState {
    /// Workspaces in creation order, each holding its folders and notes
    pub workspaces: Vec<Workspace>,
    pub selection: Selection,
    /// True until the first identity check resolves, and while a load runs
    pub is_loading: bool,
    pub user: Option<User>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            workspaces: Vec::new(),
            selection: Selection::default(),
            is_loading: true,
            user: None,
        }
    }
}

impl StoreState {
    pub fn selected_workspace(&self) -> Option<&Workspace> {
        self.workspaces
            .iter()
            .find(|w| w.id == self.selection.workspace_id)
    }

    pub fn selected_folder(&self) -> Option<&Folder> {
        self.selected_workspace()?.folder(&self.selection.folder_id)
    }

    pub fn selected_note(&self) -> Option<&Note> {
        self.selected_folder()?.note(&self.selection.note_id)
    }

    pub fn auth_status(&self) -> AuthStatus {
        if self.is_loading {
            AuthStatus::Loading
        } else if self.user.is_some() {
            AuthStatus::Authenticated
        } else {
            AuthStatus::Unauthenticated
        }
    }
}

/// Keeps the auth listener task alive. Dropping it unsubscribes.
pub struct AuthSubscription {
    handle: JoinHandle<()>,
}

impl AuthSubscription {
    pub fn unsubscribe(self) {}

    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for AuthSubscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A change the backend confirmed, kept so a load that was already in
/// flight does not drop it.
#[derive(Debug, Clone)]
enum Change {
    AddWorkspace(Workspace),
    AddFolder(Folder),
    AddNote(Note),
    PatchNote {
        id: String,
        update: NoteUpdate,
        at: DateTime<Utc>,
    },
    RemoveNote(String),
    RemoveFolder(String),
    RemoveWorkspace(String),
}

impl Change {
    /// Applies the change to `workspaces`. Adding an entity that is
    /// already present leaves the tree as it is.
    fn apply(&self, workspaces: &[Workspace]) -> Vec<Workspace> {
        match self {
            Change::AddWorkspace(workspace) => {
                if workspaces.iter().any(|w| w.id == workspace.id) {
                    return workspaces.to_vec();
                }
                tree::append_workspace(workspaces, workspace.clone())
            }
            Change::AddFolder(folder) => {
                if tree::find_folder(workspaces, &folder.id).is_some() {
                    return workspaces.to_vec();
                }
                tree::append_folder(workspaces, folder.clone())
            }
            Change::AddNote(note) => {
                if tree::find_note(workspaces, &note.id).is_some() {
                    return workspaces.to_vec();
                }
                tree::append_note(workspaces, note.clone())
            }
            Change::PatchNote { id, update, at } => tree::patch_note(workspaces, id, update, *at),
            Change::RemoveNote(id) => tree::remove_note(workspaces, id),
            Change::RemoveFolder(id) => tree::remove_folder(workspaces, id),
            Change::RemoveWorkspace(id) => tree::remove_workspace(workspaces, id),
        }
    }
}

/// Changes committed while a load runs, numbered in commit order
#[derive(Debug, Default)]
struct Journal {
    next_seq: u64,
    entries: Vec<(u64, Change)>,
}

impl Journal {
    /// Sequence number the next recorded change will get
    fn mark(&self) -> u64 {
        self.next_seq
    }

    fn record(&mut self, change: Change) {
        self.entries.push((self.next_seq, change));
        self.next_seq += 1;
    }

    /// Replays every change recorded at or after `since` onto `workspaces`.
    fn replay(&self, since: u64, workspaces: Vec<Workspace>) -> Vec<Workspace> {
        self.entries
            .iter()
            .filter(|(seq, _)| *seq >= since)
            .fold(workspaces, |tree, (_, change)| change.apply(&tree))
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

fn lock(journal: &Mutex<Journal>) -> MutexGuard<'_, Journal> {
    journal.lock().unwrap_or_else(PoisonError::into_inner)
}

struct StoreInner {
    remote: Arc<dyn RemoteStore>,
    auth: Arc<dyn AuthClient>,
    notifier: Arc<dyn Notifier>,
    provider: String,
    state: watch::Sender<StoreState>,
    /// Ticket of the most recent load; older completions are discarded
    load_generation: AtomicU64,
    /// Locked only inside `state` updates
    journal: Mutex<Journal>,
}

/// Single source of truth for the workspace tree, the selection cursor and
/// the signed-in user.
///
/// Every mutation is remote-first: the backend call is issued and only on
/// success is the in-memory tree rebuilt. On failure the previous state is
/// left as it was and an error notification is published.
///
/// Cloning is cheap and every clone drives the same state.
#[derive(Clone)]
pub struct NotesStore {
    inner: Arc<StoreInner>,
}

impl NotesStore {
    /// Creates a store over the given backends.
    ///
    /// # Arguments
    ///
    /// * `remote` - Table store holding workspaces, folders and notes
    /// * `auth` - Authentication subsystem of the same backend
    /// * `notifier` - Sink for user-facing notifications
    /// * `provider` - OAuth identity provider used by `sign_in`
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        auth: Arc<dyn AuthClient>,
        notifier: Arc<dyn Notifier>,
        provider: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(StoreState::default());
        Self {
            inner: Arc::new(StoreInner {
                remote,
                auth,
                notifier,
                provider: provider.into(),
                state,
                load_generation: AtomicU64::new(0),
                journal: Mutex::new(Journal::default()),
            }),
        }
    }

    /// Current state, cloned.
    pub fn snapshot(&self) -> StoreState {
        self.inner.state.borrow().clone()
    }

    /// Receiver that observes every published state.
    pub fn subscribe(&self) -> watch::Receiver<StoreState> {
        self.inner.state.subscribe()
    }

    pub fn select_workspace(&self, workspace_id: impl Into<String>) {
        let workspace_id = workspace_id.into();
        self.inner
            .state
            .send_modify(|s| s.selection.workspace_id = workspace_id);
    }

    pub fn select_folder(&self, folder_id: impl Into<String>) {
        let folder_id = folder_id.into();
        self.inner
            .state
            .send_modify(|s| s.selection.folder_id = folder_id);
    }

    pub fn select_note(&self, note_id: impl Into<String>) {
        let note_id = note_id.into();
        self.inner.state.send_modify(|s| s.selection.note_id = note_id);
    }

    /// Resolves the first identity check and loads the tree when a session
    /// exists.
    ///
    /// A failing identity lookup is treated as "no session".
    pub async fn initialize(&self) -> Result<()> {
        let user = match self.inner.auth.current_user().await {
            Ok(user) => user,
            Err(e) => {
                warn!("Identity check failed, continuing signed out: {}", e);
                None
            }
        };

        let signed_in = user.is_some();
        self.inner.state.send_modify(|s| {
            s.user = user;
            s.is_loading = signed_in;
        });

        if signed_in {
            self.load_all().await?;
        } else {
            info!("No active session");
        }
        Ok(())
    }

    /// Spawns a task reacting to session changes from the auth backend.
    ///
    /// A new session loads the tree; the end of a session clears the tree
    /// and the selection.
    pub fn listen_for_auth_changes(&self) -> AuthSubscription {
        let mut rx = self.inner.auth.subscribe();
        let store = self.clone();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(user) => store.handle_auth_change(user).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Auth listener skipped {} session changes", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Auth change feed closed, listener exiting");
                        break;
                    }
                }
            }
        });

        AuthSubscription { handle }
    }

    /// Applies one session change.
    pub async fn handle_auth_change(&self, user: Option<User>) {
        match user {
            Some(user) => {
                info!("Session started for user {}", user.id);
                self.inner.state.send_modify(|s| {
                    s.user = Some(user);
                    s.is_loading = true;
                });
                if let Err(e) = self.load_all().await {
                    debug!("Load after session change failed: {}", e);
                }
            }
            None => {
                info!("Session ended, clearing workspaces");
                let generation = &self.inner.load_generation;
                let journal = &self.inner.journal;
                self.inner.state.send_modify(|s| {
                    // in-flight loads belong to the old session
                    generation.fetch_add(1, Ordering::SeqCst);
                    lock(journal).clear();
                    s.user = None;
                    s.workspaces = Vec::new();
                    s.selection.clear();
                    s.is_loading = false;
                });
            }
        }
    }

    /// Fetches the whole tree for the signed-in user and replaces the
    /// in-memory one.
    ///
    /// Workspaces, then all their folders, then all notes of all folders:
    /// each stage fans out concurrently and completes before the next one
    /// starts. Any failure aborts the load and keeps the previous tree.
    /// Changes confirmed while the load runs are replayed onto the fetched
    /// tree. When nothing is selected yet, the first workspace, folder and
    /// note become the selection.
    ///
    /// # Returns
    ///
    /// `Ok(())` when the tree was replaced, or when a newer load or a
    /// sign-out superseded this one
    pub async fn load_all(&self) -> Result<()> {
        self.require_user()?;

        let ticket = self.inner.load_generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Starting load #{}", ticket);
        let journal = &self.inner.journal;
        let mut since = 0;
        self.inner.state.send_modify(|s| {
            s.is_loading = true;
            since = lock(journal).mark();
        });

        let result = self.fetch_tree().await;
        let generation = &self.inner.load_generation;

        match result {
            Ok(workspaces) => {
                let count = workspaces.len();
                let applied = self.inner.state.send_if_modified(|s| {
                    if generation.load(Ordering::SeqCst) != ticket {
                        return false;
                    }
                    let mut journal = lock(journal);
                    let workspaces = journal.replay(since, workspaces);
                    journal.clear();
                    if s.selection.is_empty() {
                        s.selection = tree::default_selection(&workspaces);
                    }
                    s.workspaces = workspaces;
                    s.is_loading = false;
                    true
                });

                if applied {
                    info!("Loaded {} workspaces", count);
                } else {
                    debug!("Discarding result of superseded load #{}", ticket);
                }
                Ok(())
            }
            Err(e) => {
                let current = self.inner.state.send_if_modified(|s| {
                    if generation.load(Ordering::SeqCst) != ticket {
                        return false;
                    }
                    lock(journal).clear();
                    s.is_loading = false;
                    true
                });

                if !current {
                    debug!("Superseded load #{} failed: {}", ticket, e);
                    return Ok(());
                }
                self.fail(
                    e,
                    Notification::error(
                        "Error loading workspaces",
                        "Failed to load your workspaces. Please try again.",
                    ),
                )
            }
        }
    }

    /// Creates a workspace and appends it to the tree.
    pub async fn create_workspace(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<Workspace> {
        let user = self.require_user()?;
        info!("Creating workspace '{}'", name);

        let row = NewWorkspaceRow {
            name,
            description,
            user_id: &user.id,
        };
        match self.insert::<_, WorkspaceRow>(Table::Workspaces, &row).await {
            Ok(row) => {
                let workspace = Workspace::from(row);
                self.commit(Change::AddWorkspace(workspace.clone()), |_| {});
                self.notify(Notification::success(
                    "Workspace created",
                    format!("\"{}\" workspace has been created successfully.", name),
                ));
                Ok(workspace)
            }
            Err(e) => self.fail(
                e,
                Notification::error(
                    "Error creating workspace",
                    "Failed to create workspace. Please try again.",
                ),
            ),
        }
    }

    /// Creates a folder inside `workspace_id` and appends it there.
    pub async fn create_folder(&self, workspace_id: &str, name: &str) -> Result<Folder> {
        let user = self.require_user()?;
        info!("Creating folder '{}' in workspace {}", name, workspace_id);

        let row = NewFolderRow {
            name,
            workspace_id,
            user_id: &user.id,
        };
        match self.insert::<_, FolderRow>(Table::Folders, &row).await {
            Ok(row) => {
                let folder = Folder::from(row);
                self.commit(Change::AddFolder(folder.clone()), |_| {});
                self.notify(Notification::success(
                    "Folder created",
                    format!("\"{}\" folder has been created successfully.", name),
                ));
                Ok(folder)
            }
            Err(e) => self.fail(
                e,
                Notification::error(
                    "Error creating folder",
                    "Failed to create folder. Please try again.",
                ),
            ),
        }
    }

    /// Creates an empty note inside `folder_id`.
    ///
    /// The title is stored as given. The new note is not selected; callers
    /// select it themselves.
    pub async fn create_note(&self, folder_id: &str, title: &str) -> Result<Note> {
        let user = self.require_user()?;
        info!("Creating note '{}' in folder {}", title, folder_id);

        let row = NewNoteRow {
            title,
            content: "",
            folder_id,
            user_id: &user.id,
        };
        match self.insert::<_, NoteRow>(Table::Notes, &row).await {
            Ok(row) => {
                let note = Note::from(row);
                self.commit(Change::AddNote(note.clone()), |_| {});
                self.notify(Notification::success(
                    "Note created",
                    format!("\"{}\" note has been created successfully.", title),
                ));
                Ok(note)
            }
            Err(e) => self.fail(
                e,
                Notification::error(
                    "Error creating note",
                    "Failed to create note. Please try again.",
                ),
            ),
        }
    }

    /// Sends the supplied fields of `update` to the backend, then patches
    /// the local note and moves its `updated_at` forward.
    ///
    /// Unknown ids leave the tree untouched.
    pub async fn update_note(&self, note_id: &str, update: NoteUpdate) -> Result<()> {
        self.require_user()?;
        if update.is_empty() {
            debug!("Empty update for note {}, nothing to send", note_id);
            return Ok(());
        }
        debug!("Updating note {}", note_id);

        let sent = match encode_row(&NotePatch::from(&update)) {
            Ok(patch) => {
                self.inner
                    .remote
                    .update(Table::Notes, note_id, patch)
                    .await
            }
            Err(e) => Err(e),
        };

        match sent {
            Ok(()) => {
                let change = Change::PatchNote {
                    id: note_id.to_string(),
                    update,
                    at: Utc::now(),
                };
                self.commit(change, |_| {});
                trace!("Note {} patched locally", note_id);
                Ok(())
            }
            Err(e) => self.fail(
                e,
                Notification::error(
                    "Error updating note",
                    "Failed to update note. Please try again.",
                ),
            ),
        }
    }

    /// Deletes a note. Clears the note selection if it pointed at it.
    pub async fn delete_note(&self, note_id: &str) -> Result<()> {
        self.require_user()?;
        info!("Deleting note {}", note_id);

        match self.inner.remote.delete(Table::Notes, note_id).await {
            Ok(()) => {
                self.commit(Change::RemoveNote(note_id.to_string()), |selection| {
                    if selection.note_id == note_id {
                        selection.note_id.clear();
                    }
                });
                self.notify(Notification::success(
                    "Note deleted",
                    "Note has been deleted successfully.",
                ));
                Ok(())
            }
            Err(e) => self.fail(
                e,
                Notification::error(
                    "Error deleting note",
                    "Failed to delete note. Please try again.",
                ),
            ),
        }
    }

    /// Deletes a folder; the backend removes its notes with it. A selected
    /// folder clears both the folder and the note selection.
    pub async fn delete_folder(&self, folder_id: &str) -> Result<()> {
        self.require_user()?;
        info!("Deleting folder {}", folder_id);

        match self.inner.remote.delete(Table::Folders, folder_id).await {
            Ok(()) => {
                self.commit(Change::RemoveFolder(folder_id.to_string()), |selection| {
                    if selection.folder_id == folder_id {
                        selection.folder_id.clear();
                        selection.note_id.clear();
                    }
                });
                self.notify(Notification::success(
                    "Folder deleted",
                    "Folder and all its notes have been deleted successfully.",
                ));
                Ok(())
            }
            Err(e) => self.fail(
                e,
                Notification::error(
                    "Error deleting folder",
                    "Failed to delete folder. Please try again.",
                ),
            ),
        }
    }

    /// Deletes a workspace with everything in it. A selected workspace
    /// clears the whole selection.
    pub async fn delete_workspace(&self, workspace_id: &str) -> Result<()> {
        self.require_user()?;
        info!("Deleting workspace {}", workspace_id);

        match self.inner.remote.delete(Table::Workspaces, workspace_id).await {
            Ok(()) => {
                self.commit(Change::RemoveWorkspace(workspace_id.to_string()), |selection| {
                    if selection.workspace_id == workspace_id {
                        selection.clear();
                    }
                });
                self.notify(Notification::success(
                    "Workspace deleted",
                    "Workspace and all its content have been deleted successfully.",
                ));
                Ok(())
            }
            Err(e) => self.fail(
                e,
                Notification::error(
                    "Error deleting workspace",
                    "Failed to delete workspace. Please try again.",
                ),
            ),
        }
    }

    /// Starts the OAuth flow with the configured provider.
    ///
    /// # Returns
    ///
    /// The URL to visit when sign-in continues out-of-band. The session
    /// itself arrives through the auth change listener.
    pub async fn sign_in(&self) -> Result<Option<String>> {
        info!("Signing in with provider '{}'", self.inner.provider);
        match self
            .inner
            .auth
            .sign_in_with_provider(&self.inner.provider)
            .await
        {
            Ok(redirect) => Ok(redirect),
            Err(e) => {
                let message = raw_message(&e);
                self.fail(e, Notification::error("Sign in failed", message))
            }
        }
    }

    /// Ends the session. The tree is cleared by the auth change listener
    /// once the backend reports the session gone.
    pub async fn sign_out(&self) -> Result<()> {
        info!("Signing out");
        match self.inner.auth.sign_out().await {
            Ok(()) => {
                self.inner.state.send_modify(|s| s.user = None);
                self.notify(Notification::success(
                    "Signed out",
                    "You have been signed out successfully.",
                ));
                Ok(())
            }
            Err(e) => {
                let message = raw_message(&e);
                self.fail(e, Notification::error("Sign out failed", message))
            }
        }
    }

    fn require_user(&self) -> Result<User> {
        self.inner
            .state
            .borrow()
            .user
            .clone()
            .ok_or(NotesError::NotAuthenticated)
    }

    /// Applies a confirmed change to the tree, and journals it while a load
    /// is running so the load's result keeps it.
    fn commit<F>(&self, change: Change, adjust_selection: F)
    where
        F: FnOnce(&mut Selection),
    {
        let journal = &self.inner.journal;
        self.inner.state.send_modify(|s| {
            s.workspaces = change.apply(&s.workspaces);
            adjust_selection(&mut s.selection);
            if s.is_loading {
                lock(journal).record(change);
            }
        });
    }

    fn notify(&self, notification: Notification) {
        self.inner.notifier.notify(notification);
    }

    fn fail<T>(&self, err: NotesError, notification: Notification) -> Result<T> {
        error!("{}: {}", notification.title, err);
        self.notify(notification);
        Err(err)
    }

    async fn insert<P: Serialize, R: DeserializeOwned>(&self, table: Table, row: &P) -> Result<R> {
        let payload = encode_row(row)?;
        let stored = self.inner.remote.insert(table, payload).await?;
        decode_row(table, stored)
    }

    async fn fetch_rows<R: DeserializeOwned>(&self, query: Query) -> Result<Vec<R>> {
        let table = query.table;
        let rows = self.inner.remote.select(query).await?;
        trace!("Fetched {} rows from {}", rows.len(), table);
        decode_rows(table, rows)
    }

    async fn fetch_tree(&self) -> Result<Vec<Workspace>> {
        let mut workspaces: Vec<Workspace> = self
            .fetch_rows::<WorkspaceRow>(Query::all(Table::Workspaces))
            .await?
            .into_iter()
            .map(Workspace::from)
            .collect();

        let folder_sets = try_join_all(workspaces.iter().map(|w| {
            self.fetch_rows::<FolderRow>(Query::eq(Table::Folders, "workspace_id", &w.id))
        }))
        .await?;
        for (workspace, folders) in workspaces.iter_mut().zip(folder_sets) {
            workspace.folders = folders.into_iter().map(Folder::from).collect();
        }

        let note_sets = try_join_all(
            workspaces
                .iter()
                .flat_map(|w| w.folders.iter())
                .map(|f| self.fetch_rows::<NoteRow>(Query::eq(Table::Notes, "folder_id", &f.id))),
        )
        .await?;
        let mut note_sets = note_sets.into_iter();
        for folder in workspaces.iter_mut().flat_map(|w| w.folders.iter_mut()) {
            folder.notes = note_sets
                .next()
                .unwrap_or_default()
                .into_iter()
                .map(Note::from)
                .collect();
        }

        Ok(workspaces)
    }
}

/// Underlying message of an auth failure, shown to the user as is
fn raw_message(err: &NotesError) -> String {
    match err {
        NotesError::Auth { message } => message.clone(),
        other => other.to_string(),
    }
}
