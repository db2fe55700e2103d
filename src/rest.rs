//! Hosted backend over HTTP.
//!
//! Tables are reached through a PostgREST-style API under `/rest/v1`, the
//! session through the auth endpoints under `/auth/v1`. Both share one
//! session, persisted to a file between runs.
use std::{
    path::PathBuf,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use log::{debug, error, info, trace, warn};
use reqwest::{header, Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::{
    load_json_file, write_json_atomic, AuthClient, NotesError, Query, RemoteStore, Result,
    Session, Table, User,
};

/// Session shared between the table client and the auth client
#[derive(Clone)]
pub struct SessionHandle {
    path: PathBuf,
    current: Arc<RwLock<Option<Session>>>,
}

impl SessionHandle {
    /// Loads the persisted session from `path`, if any.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let session: Option<Session> = load_json_file(&path)?;
        if session.is_some() {
            debug!("Restored session from {}", path.display());
        }
        Ok(Self {
            path,
            current: Arc::new(RwLock::new(session)),
        })
    }

    pub fn get(&self) -> Option<Session> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn access_token(&self) -> Option<String> {
        self.get().map(|s| s.access_token)
    }

    fn replace(&self, session: Option<Session>) -> Result<()> {
        match &session {
            Some(session) => write_json_atomic(&self.path, session)?,
            None => match std::fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(NotesError::Io(e)),
            },
        }
        match self.current.write() {
            Ok(mut guard) => *guard = session,
            Err(poisoned) => *poisoned.into_inner() = session,
        }
        Ok(())
    }
}

/// Connection settings of the hosted backend
#[derive(Clone)]
struct Endpoint {
    client: Client,
    base_url: String,
    anon_key: String,
    session: SessionHandle,
}

impl Endpoint {
    fn new(base_url: &str, anon_key: &str, session: SessionHandle) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            session,
        }
    }

    /// Adds the api key and the bearer token (session token, or the api key
    /// when signed out).
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self
            .session
            .access_token()
            .unwrap_or_else(|| self.anon_key.clone());
        request.header("apikey", &self.anon_key).bearer_auth(token)
    }
}

/// Query string of a select: all columns, optional equality filter,
/// ascending creation order.
pub fn select_params(query: &Query) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), "*".to_string())];
    if let Some((column, value)) = &query.filter {
        params.push((column.clone(), format!("eq.{}", value)));
    }
    params.push(("order".to_string(), "created_at.asc".to_string()));
    params
}

fn id_param(id: &str) -> [(&'static str, String); 1] {
    [("id", format!("eq.{}", id))]
}

/// Turns a non-success response into `NotesError::Remote`.
async fn check(table: Table, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    error!("{} request failed with {}: {}", table, status, body);
    Err(NotesError::remote(table.name(), format!("{}: {}", status, body)))
}

/// Table client for the hosted backend
pub struct RestBackend {
    endpoint: Endpoint,
}

impl RestBackend {
    pub fn new(base_url: &str, anon_key: &str, session: SessionHandle) -> Self {
        Self {
            endpoint: Endpoint::new(base_url, anon_key, session),
        }
    }

    fn table_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{}", self.endpoint.base_url, table.name())
    }
}

#[async_trait]
impl RemoteStore for RestBackend {
    async fn select(&self, query: Query) -> Result<Vec<Value>> {
        let table = query.table;
        trace!("GET {} {:?}", table, query.filter);
        let request = self
            .endpoint
            .client
            .get(self.table_url(table))
            .query(&select_params(&query));
        let response = check(table, self.endpoint.authorize(request).send().await?).await?;
        Ok(response.json().await?)
    }

    async fn insert(&self, table: Table, row: Value) -> Result<Value> {
        debug!("POST {}", table);
        let request = self
            .endpoint
            .client
            .post(self.table_url(table))
            .header("Prefer", "return=representation")
            .json(&[row]);
        let response = check(table, self.endpoint.authorize(request).send().await?).await?;
        let mut rows: Vec<Value> = response.json().await?;
        if rows.is_empty() {
            return Err(NotesError::remote(table.name(), "insert returned no row"));
        }
        Ok(rows.swap_remove(0))
    }

    async fn update(&self, table: Table, id: &str, patch: Value) -> Result<()> {
        debug!("PATCH {} {}", table, id);
        let request = self
            .endpoint
            .client
            .patch(self.table_url(table))
            .query(&id_param(id))
            .json(&patch);
        check(table, self.endpoint.authorize(request).send().await?).await?;
        Ok(())
    }

    async fn delete(&self, table: Table, id: &str) -> Result<()> {
        debug!("DELETE {} {}", table, id);
        let request = self
            .endpoint
            .client
            .delete(self.table_url(table))
            .query(&id_param(id));
        check(table, self.endpoint.authorize(request).send().await?).await?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct UserResponse {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

impl From<UserResponse> for User {
    fn from(response: UserResponse) -> Self {
        User {
            id: response.id,
            email: response.email,
        }
    }
}

/// Body of a token grant
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    user: UserResponse,
}

impl From<TokenResponse> for Session {
    fn from(response: TokenResponse) -> Self {
        Session {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            user: response.user.into(),
        }
    }
}

/// Auth client for the hosted backend
pub struct RestAuth {
    endpoint: Endpoint,
    changes: broadcast::Sender<Option<User>>,
    /// Where the provider sends the browser after sign-in
    redirect_to: Option<String>,
}

impl RestAuth {
    pub fn new(base_url: &str, anon_key: &str, session: SessionHandle) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            endpoint: Endpoint::new(base_url, anon_key, session),
            changes,
            redirect_to: None,
        }
    }

    pub fn with_redirect(mut self, redirect_to: impl Into<String>) -> Self {
        self.redirect_to = Some(redirect_to.into());
        self
    }

    /// URL that starts the OAuth flow for `provider`.
    pub fn authorize_url(&self, provider: &str) -> Result<String> {
        let mut params = vec![("provider", provider)];
        if let Some(redirect) = &self.redirect_to {
            params.push(("redirect_to", redirect.as_str()));
        }
        let base = format!("{}/auth/v1/authorize", self.endpoint.base_url);
        let url = Url::parse_with_params(&base, &params).map_err(|e| NotesError::ConfigError {
            message: format!("Invalid rest_url '{}': {}", self.endpoint.base_url, e),
        })?;
        Ok(url.to_string())
    }

    /// Finishes an out-of-band sign-in with the access token the provider
    /// handed back: verifies it, persists the session and announces it.
    pub async fn complete_sign_in(
        &self,
        access_token: &str,
        refresh_token: Option<String>,
    ) -> Result<User> {
        let Some(user) = self.fetch_user(access_token).await? else {
            return Err(NotesError::Auth {
                message: "access token was rejected".to_string(),
            });
        };

        self.endpoint.session.replace(Some(Session {
            access_token: access_token.to_string(),
            refresh_token,
            user: user.clone(),
        }))?;
        info!("Signed in as {}", user.email.as_deref().unwrap_or(&user.id));
        let _ = self.changes.send(Some(user.clone()));
        Ok(user)
    }

    /// Trades a refresh token for a new session. `None` when the backend no
    /// longer accepts the token.
    async fn refresh_session(&self, refresh_token: &str) -> Result<Option<Session>> {
        let response = self
            .endpoint
            .client
            .post(format!("{}/auth/v1/token", self.endpoint.base_url))
            .query(&[("grant_type", "refresh_token")])
            .header("apikey", &self.endpoint.anon_key)
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;

        match response.status() {
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(None),
            status if status.is_success() => {
                let granted: TokenResponse = response.json().await?;
                Ok(Some(granted.into()))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(NotesError::Auth {
                    message: format!("{}: {}", status, body),
                })
            }
        }
    }

    /// `None` when the token is not (or no longer) valid.
    async fn fetch_user(&self, access_token: &str) -> Result<Option<User>> {
        let response = self
            .endpoint
            .client
            .get(format!("{}/auth/v1/user", self.endpoint.base_url))
            .header("apikey", &self.endpoint.anon_key)
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(None),
            status if status.is_success() => {
                let user: UserResponse = response.json().await?;
                Ok(Some(user.into()))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(NotesError::Auth {
                    message: format!("{}: {}", status, body),
                })
            }
        }
    }
}

#[async_trait]
impl AuthClient for RestAuth {
    async fn current_user(&self) -> Result<Option<User>> {
        let Some(session) = self.endpoint.session.get() else {
            return Ok(None);
        };
        if let Some(user) = self.fetch_user(&session.access_token).await? {
            return Ok(Some(user));
        }

        if let Some(refresh_token) = &session.refresh_token {
            if let Some(renewed) = self.refresh_session(refresh_token).await? {
                let user = renewed.user.clone();
                self.endpoint.session.replace(Some(renewed))?;
                info!("Renewed expired session for {}", user.id);
                return Ok(Some(user));
            }
        }

        warn!("Stored session expired, discarding it");
        self.endpoint.session.replace(None)?;
        Ok(None)
    }

    fn subscribe(&self) -> broadcast::Receiver<Option<User>> {
        self.changes.subscribe()
    }

    async fn sign_in_with_provider(&self, provider: &str) -> Result<Option<String>> {
        let url = self.authorize_url(provider)?;
        info!("Sign-in continues in the browser: {}", url);
        Ok(Some(url))
    }

    async fn sign_out(&self) -> Result<()> {
        if let Some(token) = self.endpoint.session.access_token() {
            let response = self
                .endpoint
                .client
                .post(format!("{}/auth/v1/logout", self.endpoint.base_url))
                .header("apikey", &self.endpoint.anon_key)
                .bearer_auth(token)
                .send()
                .await
                .map_err(|e| NotesError::Auth {
                    message: e.to_string(),
                })?;

            let status = response.status();
            // an already-invalid token still ends the local session
            if !status.is_success() && status != StatusCode::UNAUTHORIZED {
                let body = response.text().await.unwrap_or_default();
                return Err(NotesError::Auth {
                    message: format!("{}: {}", status, body),
                });
            }
        }

        self.endpoint.session.replace(None)?;
        let _ = self.changes.send(None);
        Ok(())
    }
}
