//! Workflow engine and storage ports for relflow.
//!
//! This crate holds the engine itself and defines the "ports" (repository
//! traits) that the infrastructure layer implements. It depends only on
//! `relflow-types` -- never on `relflow-infra` or any database/IO crate.

pub mod event;
pub mod repository;
pub mod workflow;
