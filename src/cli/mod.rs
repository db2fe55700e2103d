//! CLI module for the wsnotes application
//!
//! The terminal front end: parses arguments, drives the store and renders
//! its state.
mod app;
mod args;

pub use app::*;
pub use args::*;
