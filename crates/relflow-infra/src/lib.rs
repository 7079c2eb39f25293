//! Infrastructure layer for relflow.
//!
//! Contains implementations of the repository traits defined in `relflow-core`
//! (SQLite storage) and the loader for the host's global configuration.

pub mod config;
pub mod sqlite;
