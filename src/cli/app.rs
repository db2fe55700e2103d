use std::{
    fs::{read_to_string, OpenOptions},
    io::{stdin, stdout, Write},
    path::{Path, PathBuf},
    process::Command,
    sync::Arc,
    time::Duration,
};

use log::{debug, info};
use shell_words::split;
use tempfile::Builder;

use crate::{
    content_preview, trim_name, tree, AuthClient, AuthStatus, BackendKind, Commands, Config,
    FolderAction, LocalAuth, LocalBackend, Note, NoteAction, NoteUpdate, NotesError, NotesStore,
    Notifier, RemoteStore, RestAuth, RestBackend, Result, SessionHandle, StoreState,
    WorkspaceAction,
};

/// How long to wait for the auth listener to apply a session change
const SESSION_CHANGE_TIMEOUT: Duration = Duration::from_secs(15);

/// CLI Application handler - processes CLI commands and drives the NotesStore
pub struct App {
    store: NotesStore,

    /// Application configuration
    config: Config,

    /// Where `config` was read from
    config_path: PathBuf,

    /// Present for the hosted backend, which finishes sign-in with a token
    rest_auth: Option<Arc<RestAuth>>,

    /// Whether to display verbose output
    verbose: bool,
}

impl App {
    /// Builds the backends named by `config` and a store over them.
    pub fn from_config(
        config: Config,
        config_path: PathBuf,
        notifier: Arc<dyn Notifier>,
        verbose: bool,
    ) -> Result<Self> {
        let (remote, auth, rest_auth) = match config.backend {
            BackendKind::Local => {
                let remote: Arc<dyn RemoteStore> =
                    Arc::new(LocalBackend::new(config.data_dir.clone()));
                let auth: Arc<dyn AuthClient> =
                    Arc::new(LocalAuth::new(&config.data_dir, config.local_user()));
                (remote, auth, None)
            }
            BackendKind::Rest => {
                let (url, key) = config.rest_endpoint()?;
                let session = SessionHandle::load(config.session_path())?;
                let mut rest_auth = RestAuth::new(url, key, session.clone());
                if let Some(redirect) = &config.redirect_url {
                    rest_auth = rest_auth.with_redirect(redirect.clone());
                }
                let rest_auth = Arc::new(rest_auth);
                let remote: Arc<dyn RemoteStore> = Arc::new(RestBackend::new(url, key, session));
                let auth: Arc<dyn AuthClient> = rest_auth.clone();
                (remote, auth, Some(rest_auth))
            }
        };

        let store = NotesStore::new(remote, auth, notifier, config.auth_provider.clone());
        Ok(Self {
            store,
            config,
            config_path,
            rest_auth,
            verbose,
        })
    }

    /// Run the CLI application with the given command
    pub async fn run(&self, command: Commands) -> Result<()> {
        if let Commands::Config { reset } = command {
            return self.handle_config(reset);
        }

        self.store.initialize().await?;
        let _auth_listener = self.store.listen_for_auth_changes();
        debug!("Store ready: {}", self.store.snapshot().auth_status());

        match command {
            Commands::Login {
                token,
                refresh_token,
            } => self.handle_login(token, refresh_token).await?,
            Commands::Logout => self.handle_logout().await?,
            Commands::Whoami => self.handle_whoami(),
            Commands::Tree { search, json } => self.handle_tree(search, json)?,
            Commands::Workspace { action } => self.handle_workspace(action).await?,
            Commands::Folder { action } => self.handle_folder(action).await?,
            Commands::Note { action } => self.handle_note(action).await?,
            Commands::Config { .. } => {}
        }

        Ok(())
    }

    fn handle_config(&self, reset: bool) -> Result<()> {
        let config = if reset {
            let defaults = Config::default();
            defaults.save(&self.config_path)?;
            println!("Configuration reset: {}", self.config_path.display());
            defaults
        } else {
            self.config.clone()
        };
        println!("{}", serde_json::to_string_pretty(&config)?);
        Ok(())
    }

    async fn handle_login(
        &self,
        token: Option<String>,
        refresh_token: Option<String>,
    ) -> Result<()> {
        if let Some(token) = token {
            let Some(rest_auth) = &self.rest_auth else {
                return Err(NotesError::InvalidInput {
                    message: "--token only applies to the rest backend".to_string(),
                });
            };
            let refresh_token = refresh_token.map(|t| t.trim().to_string());
            rest_auth.complete_sign_in(token.trim(), refresh_token).await?;
        } else {
            if let Some(user) = self.store.snapshot().user {
                println!("Already signed in as {}", display_user(&user.id, &user.email));
                return Ok(());
            }
            if let Some(url) = self.store.sign_in().await? {
                println!("Open this URL to sign in:\n\n  {}\n", url);
                println!(
                    "Then run: wsnotes login --token <access_token> --refresh-token <refresh_token>"
                );
                return Ok(());
            }
        }

        self.wait_until(|s| s.auth_status() == AuthStatus::Authenticated)
            .await?;
        if let Some(user) = self.store.snapshot().user {
            println!("Signed in as {}", display_user(&user.id, &user.email));
        }
        Ok(())
    }

    async fn handle_logout(&self) -> Result<()> {
        if self.store.snapshot().user.is_none() {
            println!("Not signed in.");
            return Ok(());
        }
        self.store.sign_out().await?;
        self.wait_until(|s| s.user.is_none() && s.workspaces.is_empty())
            .await
    }

    fn handle_whoami(&self) {
        let state = self.store.snapshot();
        match &state.user {
            Some(user) => {
                println!("{}", display_user(&user.id, &user.email));
                if self.verbose {
                    println!(
                        "{} workspaces, backend: {:?}",
                        state.workspaces.len(),
                        self.config.backend
                    );
                }
            }
            None => println!("Not signed in. Run `wsnotes login`."),
        }
    }

    fn handle_tree(&self, search: Option<String>, json: bool) -> Result<()> {
        let state = self.signed_in_state()?;
        let query = search.as_deref().map(str::trim).unwrap_or("");
        let workspaces = tree::filter_notes(&state.workspaces, query);

        if json {
            println!("{}", serde_json::to_string_pretty(&workspaces)?);
            return Ok(());
        }

        if workspaces.is_empty() {
            println!("No workspaces yet. Create one with `wsnotes workspace create <name>`.");
            return Ok(());
        }

        let selection = &state.selection;
        for workspace in &workspaces {
            let marker = if workspace.id == selection.workspace_id { "*" } else { " " };
            print!(
                "{} {} {}",
                marker,
                console::style(&workspace.name).bold(),
                console::style(format!("[{}]", workspace.id)).dim()
            );
            match &workspace.description {
                Some(description) => println!("  {}", description),
                None => println!(),
            }

            for folder in &workspace.folders {
                let marker = if folder.id == selection.folder_id { "*" } else { " " };
                println!(
                    "  {} {} {}",
                    marker,
                    console::style(&folder.name).cyan(),
                    console::style(format!("[{}]", folder.id)).dim()
                );

                for note in &folder.notes {
                    let marker = if note.id == selection.note_id { "*" } else { " " };
                    println!(
                        "    {} {} {}  {}",
                        marker,
                        note.title,
                        console::style(format!("[{}]", note.id)).dim(),
                        note.updated_at.format("%Y-%m-%d %H:%M")
                    );
                }
            }
        }

        if !query.is_empty() {
            let hits: usize = workspaces.iter().map(|w| w.note_count()).sum();
            println!(
                "\nFound {} note{} matching \"{}\"",
                hits,
                if hits == 1 { "" } else { "s" },
                query
            );
        }
        Ok(())
    }

    async fn handle_workspace(&self, action: WorkspaceAction) -> Result<()> {
        self.signed_in_state()?;
        match action {
            WorkspaceAction::Create { name, description } => {
                let name = trim_name(&name, "Workspace name")?;
                let description = description
                    .as_deref()
                    .map(str::trim)
                    .filter(|d| !d.is_empty());
                let workspace = self.store.create_workspace(&name, description).await?;
                println!("Workspace created with ID: {}", workspace.id);
            }
            WorkspaceAction::Delete { id, force } => {
                let state = self.store.snapshot();
                let workspace = state
                    .workspaces
                    .iter()
                    .find(|w| w.id == id)
                    .ok_or_else(|| NotesError::NotFound {
                        kind: "Workspace",
                        id: id.clone(),
                    })?;

                let summary = format!(
                    "workspace '{}' with {} folders and {} notes",
                    workspace.name,
                    workspace.folders.len(),
                    workspace.note_count()
                );
                if force || self.confirm(&summary)? {
                    self.store.delete_workspace(&id).await?;
                }
            }
        }
        Ok(())
    }

    async fn handle_folder(&self, action: FolderAction) -> Result<()> {
        let state = self.signed_in_state()?;
        match action {
            FolderAction::Create { workspace_id, name } => {
                if !state.workspaces.iter().any(|w| w.id == workspace_id) {
                    return Err(NotesError::NotFound {
                        kind: "Workspace",
                        id: workspace_id,
                    });
                }
                let name = trim_name(&name, "Folder name")?;
                let folder = self.store.create_folder(&workspace_id, &name).await?;
                println!("Folder created with ID: {}", folder.id);
            }
            FolderAction::Delete { id, force } => {
                let folder = tree::find_folder(&state.workspaces, &id).ok_or_else(|| {
                    NotesError::NotFound {
                        kind: "Folder",
                        id: id.clone(),
                    }
                })?;

                let summary = format!("folder '{}' with {} notes", folder.name, folder.notes.len());
                if force || self.confirm(&summary)? {
                    self.store.delete_folder(&id).await?;
                }
            }
        }
        Ok(())
    }

    async fn handle_note(&self, action: NoteAction) -> Result<()> {
        let state = self.signed_in_state()?;
        match action {
            NoteAction::Create {
                folder_id,
                title,
                edit,
            } => {
                let folder = tree::find_folder(&state.workspaces, &folder_id).ok_or_else(|| {
                    NotesError::NotFound {
                        kind: "Folder",
                        id: folder_id.clone(),
                    }
                })?;
                let title = trim_name(&title, "Note title")?;

                let note = self.store.create_note(&folder.id, &title).await?;
                self.select(&folder.workspace_id, &folder.id, &note.id);
                println!("Note created with ID: {}", note.id);

                if edit {
                    let content = self.open_editor_with_content(&note.title, "")?;
                    self.store
                        .update_note(&note.id, NoteUpdate::content(content))
                        .await?;
                }
            }
            NoteAction::Show { id, json } => {
                let note = self.find_note(&state, &id)?;
                if let Some(folder) = tree::find_folder(&state.workspaces, &note.folder_id) {
                    self.select(&folder.workspace_id, &folder.id, &note.id);
                }

                if json {
                    println!("{}", serde_json::to_string_pretty(&note)?);
                } else {
                    self.display_note(&note);
                }
            }
            NoteAction::Edit {
                id,
                title,
                content,
                file,
                edit,
            } => {
                let note = self.find_note(&state, &id)?;
                let update = self.build_update(&note, title, content, file, edit)?;
                self.store.update_note(&note.id, update).await?;
                println!("Note {} updated successfully", note.id);
            }
            NoteAction::Delete { id, force } => {
                let note = self.find_note(&state, &id)?;
                let mut summary = format!("note '{}'", note.title);
                let preview = content_preview(&note.content, 60);
                if !preview.is_empty() {
                    summary.push_str(&format!(" ({})", preview));
                }
                if force || self.confirm(&summary)? {
                    self.store.delete_note(&id).await?;
                }
            }
        }
        Ok(())
    }

    fn build_update(
        &self,
        note: &Note,
        title: Option<String>,
        content: Option<String>,
        file: Option<PathBuf>,
        open_editor: bool,
    ) -> Result<NoteUpdate> {
        let sources = [content.is_some(), file.is_some(), open_editor]
            .iter()
            .filter(|set| **set)
            .count();
        if sources > 1 {
            return Err(NotesError::InvalidInput {
                message: "Use only one of --content, --file and --edit".to_string(),
            });
        }

        let title = title
            .map(|t| trim_name(&t, "Note title"))
            .transpose()?;

        let content = if let Some(content) = content {
            Some(content)
        } else if let Some(path) = file {
            Some(self.read_content_from_file(&path)?)
        } else if open_editor {
            let edited = self.open_editor_with_content(
                title.as_deref().unwrap_or(&note.title),
                &note.content,
            )?;
            (edited != note.content).then_some(edited)
        } else {
            None
        };

        let update = NoteUpdate { title, content };
        if update.is_empty() {
            return Err(NotesError::InvalidInput {
                message: "Nothing to update".to_string(),
            });
        }
        Ok(update)
    }

    fn display_note(&self, note: &Note) {
        let term_width = terminal_size::terminal_size()
            .map(|(w, _)| w.0 as usize)
            .unwrap_or(80);

        println!("{}", console::style(&note.title).bold());
        println!(
            "ID: {} | Created: {} | Last updated: {}",
            note.id,
            note.created_at.format("%Y-%m-%d %H:%M"),
            note.updated_at.format("%Y-%m-%d %H:%M")
        );
        println!("{}", "-".repeat(term_width.min(50)));
        if note.content.is_empty() {
            println!("{}", console::style("(empty)").dim());
        } else {
            println!("{}", note.content);
        }
    }

    fn signed_in_state(&self) -> Result<StoreState> {
        let state = self.store.snapshot();
        if state.user.is_none() {
            return Err(NotesError::NotAuthenticated);
        }
        Ok(state)
    }

    fn find_note(&self, state: &StoreState, id: &str) -> Result<Note> {
        tree::find_note(&state.workspaces, id)
            .cloned()
            .ok_or_else(|| NotesError::NotFound {
                kind: "Note",
                id: id.to_string(),
            })
    }

    fn select(&self, workspace_id: &str, folder_id: &str, note_id: &str) {
        self.store.select_workspace(workspace_id);
        self.store.select_folder(folder_id);
        self.store.select_note(note_id);
    }

    /// Waits for the auth listener to publish a state matching `condition`.
    async fn wait_until<F>(&self, condition: F) -> Result<()>
    where
        F: Fn(&StoreState) -> bool,
    {
        let mut rx = self.store.subscribe();
        let reached = tokio::time::timeout(SESSION_CHANGE_TIMEOUT, async {
            rx.wait_for(|state| condition(state)).await.is_ok()
        })
        .await;

        match reached {
            Ok(true) => Ok(()),
            Ok(false) => Err(NotesError::Auth {
                message: "store closed before the session change was applied".to_string(),
            }),
            Err(_) => Err(NotesError::Auth {
                message: "timed out waiting for the session change".to_string(),
            }),
        }
    }

    fn confirm(&self, what: &str) -> Result<bool> {
        println!("You are about to delete {}.", what);
        println!("This action cannot be undone!");
        print!("Are you sure? [y/N]: ");
        stdout().flush().map_err(NotesError::Io)?;

        let mut input = String::new();
        stdin().read_line(&mut input).map_err(NotesError::Io)?;

        let input = input.trim().to_lowercase();
        if input != "y" && input != "yes" {
            println!("Deletion cancelled.");
            return Ok(false);
        }
        Ok(true)
    }

    fn read_content_from_file(&self, path: &Path) -> Result<String> {
        if !path.is_file() {
            return Err(NotesError::FileNotFound {
                file_path: path.display().to_string(),
            });
        }
        read_to_string(path).map_err(NotesError::Io)
    }

    fn open_editor_with_content(&self, title: &str, existing_content: &str) -> Result<String> {
        let temp_file = Builder::new().suffix(".md").tempfile()?;
        let temp_path = temp_file.path().to_path_buf();

        {
            let mut file = OpenOptions::new().write(true).open(&temp_path)?;
            writeln!(file, "<!-- Editing: {} -->", title)?;
            writeln!(
                file,
                "<!-- Lines that start with <!-- and end with --> are ignored. Save and exit when done. -->"
            )?;
            write!(file, "{}", existing_content)?;
        }

        let editor_cmd = self.config.get_editor_command();
        info!("Opening editor to write note content. Save and exit when done...");
        self.launch_editor(&editor_cmd, &temp_path)?;

        let content = read_to_string(&temp_path)?;
        Ok(strip_editor_comments(&content))
    }

    fn launch_editor(&self, editor_cmd: &str, file_path: &Path) -> Result<()> {
        let args = split(editor_cmd).map_err(|e| NotesError::EditorError {
            message: format!("Failed to parse editor command: {}", e),
        })?;

        let Some((program, rest)) = args.split_first() else {
            return Err(NotesError::EditorError {
                message: "Empty editor command".to_string(),
            });
        };

        let status = Command::new(program)
            .args(rest)
            .arg(file_path)
            .status()
            .map_err(|e| NotesError::EditorError {
                message: format!("Failed to execute editor command: {}", e),
            })?;

        if !status.success() {
            return Err(NotesError::EditorError {
                message: "Editor exited with non-zero status".to_string(),
            });
        }
        Ok(())
    }
}

fn display_user(id: &str, email: &Option<String>) -> String {
    match email {
        Some(email) => format!("{} ({})", email, id),
        None => id.to_string(),
    }
}

/// Drops the `<!-- ... -->` guide lines written into the editor buffer.
fn strip_editor_comments(content: &str) -> String {
    content
        .lines()
        .filter(|line| {
            let line = line.trim();
            !(line.starts_with("<!--") && line.ends_with("-->"))
        })
        .collect::<Vec<&str>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn editor_guide_lines_are_removed() {
        let buffer = "<!-- Editing: Title -->\n<!-- guide -->\nfirst\n\nsecond";
        assert_eq!(strip_editor_comments(buffer), "first\n\nsecond");
    }

    #[test]
    fn user_display_prefers_email() {
        assert_eq!(
            display_user("u1", &Some("a@example.com".to_string())),
            "a@example.com (u1)"
        );
        assert_eq!(display_user("u1", &None), "u1");
    }
}
