use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use which::which;

use crate::{load_json_file, write_json_atomic, NotesError, Result, DEFAULT_PROVIDER};

/// Which backend the application talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// JSON files under `data_dir`
    #[default]
    Local,
    /// Hosted table store at `rest_url`
    Rest,
}

impl std::str::FromStr for BackendKind {
    type Err = NotesError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(BackendKind::Local),
            "rest" | "remote" | "hosted" => Ok(BackendKind::Rest),
            other => Err(NotesError::ConfigError {
                message: format!("Unknown backend: {}", other),
            }),
        }
    }
}

/// Application configuration settings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub backend: BackendKind,

    /// Directory for local tables and the session file
    pub data_dir: PathBuf,

    /// Base URL of the hosted backend
    pub rest_url: Option<String>,

    /// Public api key of the hosted backend
    pub anon_key: Option<String>,

    /// OAuth identity provider
    pub auth_provider: String,

    /// Where the provider redirects after sign-in
    pub redirect_url: Option<String>,

    /// Session file, defaults to `data_dir/session.json`
    pub session_file: Option<PathBuf>,

    /// Identity used by the local backend
    pub local_user: Option<String>,

    /// Default editor command
    pub editor_command: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = project_dirs()
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from(".wsnotes"));

        Self {
            backend: BackendKind::default(),
            data_dir,
            rest_url: None,
            anon_key: None,
            auth_provider: DEFAULT_PROVIDER.to_string(),
            redirect_url: None,
            session_file: None,
            local_user: None,
            editor_command: None,
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "wsnotes")
}

impl Config {
    /// Default location of the configuration file
    pub fn default_path() -> PathBuf {
        project_dirs()
            .map(|dirs| dirs.config_dir().join("config.json"))
            .unwrap_or_else(|| PathBuf::from("wsnotes.json"))
    }

    /// Reads the configuration at `path`, writing defaults there when the
    /// file does not exist yet.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        match load_json_file::<Config>(path)? {
            Some(config) => {
                debug!("Loaded configuration from {}", path.display());
                Ok(config)
            }
            None => {
                let config = Config::default();
                config.save(path)?;
                info!("Wrote default configuration to {}", path.display());
                Ok(config)
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }

    /// Applies `WSNOTES_BACKEND`, `WSNOTES_URL` and `WSNOTES_ANON_KEY`.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = lookup("WSNOTES_BACKEND") {
            self.backend = backend.parse()?;
        }
        if let Some(url) = lookup("WSNOTES_URL") {
            self.rest_url = Some(url);
        }
        if let Some(key) = lookup("WSNOTES_ANON_KEY") {
            self.anon_key = Some(key);
        }
        Ok(())
    }

    pub fn session_path(&self) -> PathBuf {
        self.session_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("session.json"))
    }

    /// Identity of the local backend: configured name, then `$USER`.
    pub fn local_user(&self) -> String {
        self.local_user
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .or_else(|| std::env::var("USERNAME").ok())
            .unwrap_or_else(|| "local".to_string())
    }

    /// URL and key of the hosted backend, both required for `rest`.
    pub fn rest_endpoint(&self) -> Result<(&str, &str)> {
        match (self.rest_url.as_deref(), self.anon_key.as_deref()) {
            (Some(url), Some(key)) if !url.is_empty() && !key.is_empty() => Ok((url, key)),
            _ => Err(NotesError::ConfigError {
                message: "rest backend needs both rest_url and anon_key (or WSNOTES_URL / WSNOTES_ANON_KEY)"
                    .to_string(),
            }),
        }
    }

    /// Configured editor, then `$EDITOR`, then the first common editor on `PATH`.
    pub fn get_editor_command(&self) -> String {
        if let Some(editor) = &self.editor_command {
            return editor.clone();
        }

        if let Ok(editor) = std::env::var("EDITOR") {
            return editor;
        }

        if cfg!(windows) {
            "notepad".to_string()
        } else if cfg!(target_os = "macos") {
            "open -t".to_string()
        } else {
            for editor in &["nano", "vim", "vi", "emacs"] {
                if which(editor).is_ok() {
                    return editor.to_string();
                }
            }
            "nano".to_string()
        }
    }
}
