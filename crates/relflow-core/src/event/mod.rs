//! Workflow event distribution.
//!
//! `EventBus` fans `WorkflowEvent`s out over a `tokio::sync::broadcast`
//! channel; `EventListener` mirrors an engine listener's callbacks onto it.

pub mod bus;
pub mod listener;

pub use bus::EventBus;
pub use listener::EventListener;
