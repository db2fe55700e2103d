//! Contracts for the persistence and authentication backends.
//!
//! The store only needs a generic table API (select with an optional
//! equality filter, insert, update by id, delete by id) and a small auth
//! surface. Rows travel as JSON values; `rows` does the typed translation.
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::{Result, User};

/// Tables known to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Workspaces,
    Folders,
    Notes,
}

impl Table {
    /// Wire name of the table
    pub fn name(&self) -> &'static str {
        match self {
            Table::Workspaces => "workspaces",
            Table::Folders => "folders",
            Table::Notes => "notes",
        }
    }

    pub fn all() -> [Table; 3] {
        [Table::Workspaces, Table::Folders, Table::Notes]
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A select over one table, always ordered by `created_at` ascending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub table: Table,
    /// Equality filter as `(column, value)`
    pub filter: Option<(String, String)>,
}

impl Query {
    pub fn all(table: Table) -> Self {
        Self {
            table,
            filter: None,
        }
    }

    pub fn eq(table: Table, column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            table,
            filter: Some((column.into(), value.into())),
        }
    }

    /// Checks a raw row against the equality filter
    pub fn matches(&self, row: &Value) -> bool {
        match &self.filter {
            None => true,
            Some((column, value)) => row.get(column).and_then(Value::as_str) == Some(value),
        }
    }
}

/// Hosted table store
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Rows matching the query, ascending by `created_at`
    async fn select(&self, query: Query) -> Result<Vec<Value>>;

    /// Inserts one row and returns it as stored, with `id` and timestamps
    async fn insert(&self, table: Table, row: Value) -> Result<Value>;

    /// Updates the given columns of the row with this id
    async fn update(&self, table: Table, id: &str, patch: Value) -> Result<()>;

    async fn delete(&self, table: Table, id: &str) -> Result<()>;
}

/// Authentication subsystem of the backend
#[async_trait]
pub trait AuthClient: Send + Sync {
    /// Identity of the current session, if any
    async fn current_user(&self) -> Result<Option<User>>;

    /// Session-change feed. Each message is the new identity or `None` when
    /// the session ended. Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<Option<User>>;

    /// Starts an OAuth sign-in. Returns the URL to visit when the flow
    /// continues out-of-band; completion arrives through `subscribe`.
    async fn sign_in_with_provider(&self, provider: &str) -> Result<Option<String>>;

    async fn sign_out(&self) -> Result<()>;
}
