//! Shared domain types for relflow.
//!
//! Durable workflow snapshots, configuration, lifecycle events, and the
//! error types used by the storage and listener ports.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod workflow;
