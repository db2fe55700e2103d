//! Workspace notes library
//!
//! This library keeps a tree of workspaces, folders and notes in sync with a
//! table-based backend, tracks the current selection and the signed-in user,
//! and reports the outcome of every operation as a short notification.

mod cli;
mod config;
mod errors;
mod helper;
mod local;
mod note;
mod notify;
mod remote;
mod rest;
mod rows;
mod store;
mod types;
pub mod tree;

// Re-export key components
pub use cli::*;
pub use config::*;
pub use errors::*;
pub use helper::*;
pub use local::*;
pub use note::*;
pub use notify::*;
pub use remote::*;
pub use rest::*;
pub use rows::*;
pub use store::*;
pub use types::*;
