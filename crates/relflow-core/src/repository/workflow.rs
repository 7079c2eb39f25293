//! Workflow repository trait definition.
//!
//! Defines the storage interface for workflow executions and their step
//! snapshots. The infrastructure layer (relflow-infra) implements this trait
//! with SQLite persistence.

use std::collections::HashMap;

use relflow_types::error::RepositoryError;
use relflow_types::workflow::{StepSnapshot, WorkflowRecord};
use uuid::Uuid;

/// Repository trait for workflow persistence.
///
/// Covers two entity families:
/// - **Workflows:** one record per execution (definition name, parameters,
///   completion state).
/// - **Steps:** the latest snapshot of each step, keyed by
///   `(workflow_id, step name)`.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Workflows
    // -----------------------------------------------------------------------

    /// Create a new workflow record.
    fn create_workflow(
        &self,
        record: &WorkflowRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a workflow record by its UUID.
    fn get_workflow(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowRecord>, RepositoryError>> + Send;

    /// List workflow records, newest first.
    fn list_workflows(
        &self,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowRecord>, RepositoryError>> + Send;

    /// List workflows that have not finished, oldest first.
    fn list_unfinished_workflows(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowRecord>, RepositoryError>> + Send;

    /// Record the outcome of a workflow and mark it finished.
    fn mark_finished(
        &self,
        id: &Uuid,
        outputs: Option<&HashMap<String, serde_json::Value>>,
        error: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    /// Insert or replace the snapshot of one step.
    fn upsert_step(
        &self,
        workflow_id: &Uuid,
        snapshot: &StepSnapshot,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// All step snapshots of a workflow, ordered by step name.
    fn list_steps(
        &self,
        workflow_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<StepSnapshot>, RepositoryError>> + Send;
}
