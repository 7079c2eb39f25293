//! Durable checkpoints for workflow execution state.
//!
//! `CheckpointListener` wraps a `WorkflowRepository` and implements the
//! engine's `Listener` contract by persisting every step snapshot before the
//! run loop moves on. `restore` reads the snapshots back for `Workflow::resume`.

use std::collections::HashMap;
use std::sync::Arc;

use relflow_types::error::{ListenerError, RepositoryError};
use relflow_types::workflow::{StepSnapshot, WorkflowState};
use uuid::Uuid;

use crate::repository::workflow::WorkflowRepository;

use super::context::{StepLogger, TracingLogger};
use super::listener::Listener;

// ---------------------------------------------------------------------------
// CheckpointListener
// ---------------------------------------------------------------------------

/// Persists step state through a repository.
///
/// Generic over `R: WorkflowRepository` so it works with any storage backend
/// (SQLite, in-memory, etc.).
pub struct CheckpointListener<R: WorkflowRepository> {
    repo: R,
}

impl<R: WorkflowRepository> CheckpointListener<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Load what `Workflow::resume` needs for workflow `id`.
    pub async fn restore(
        &self,
        id: Uuid,
    ) -> Result<(WorkflowState, HashMap<String, StepSnapshot>), CheckpointError> {
        let record = self
            .repo
            .get_workflow(&id)
            .await?
            .ok_or(CheckpointError::WorkflowNotFound(id))?;
        let snapshots = self
            .repo
            .list_steps(&id)
            .await?
            .into_iter()
            .map(|snapshot| (snapshot.name.clone(), snapshot))
            .collect::<HashMap<_, _>>();
        tracing::debug!(workflow_id = %id, steps = snapshots.len(), "restored workflow checkpoint");
        Ok((record.state(), snapshots))
    }
}

impl<R: WorkflowRepository> Listener for CheckpointListener<R> {
    async fn step_state_changed(
        &self,
        workflow_id: Uuid,
        step: &str,
        state: &StepSnapshot,
    ) -> Result<(), ListenerError> {
        self.repo.upsert_step(&workflow_id, state).await?;
        tracing::debug!(
            workflow_id = %workflow_id,
            step,
            status = %state.status(),
            "checkpointed step state"
        );
        Ok(())
    }

    async fn workflow_stalled(&self, workflow_id: Uuid) -> Result<(), ListenerError> {
        tracing::warn!(workflow_id = %workflow_id, "workflow stalled, operator action needed");
        Ok(())
    }

    fn logger(&self, workflow_id: Uuid, step: &str) -> Arc<dyn StepLogger> {
        Arc::new(TracingLogger::new(workflow_id, step))
    }
}

// ---------------------------------------------------------------------------
// CheckpointError
// ---------------------------------------------------------------------------

/// Errors from checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryWorkflowRepository;
    use crate::workflow::context::TaskContext;
    use crate::workflow::definition::{Builder, Definition};
    use crate::workflow::instance::Workflow;
    use crate::workflow::param::ParamDef;
    use relflow_types::workflow::{Params, WorkflowRecord};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    async fn greet(_ctx: TaskContext, name: String) -> anyhow::Result<String> {
        Ok(format!("hello, {name}"))
    }

    fn definition() -> Definition {
        let mut wd = Definition::new();
        let name = wd.param(ParamDef::<String>::new("name"));
        let greeting = wd.task1("greet", greet, &name);
        wd.output("greeting", &greeting);
        wd
    }

    #[tokio::test]
    async fn run_checkpoints_every_step() {
        let listener = CheckpointListener::new(MemoryWorkflowRepository::new());
        let params = Params::from([("name".to_string(), json!("gopher"))]);
        let mut wf = Workflow::start(definition(), params.clone()).unwrap();
        listener
            .repo()
            .create_workflow(&WorkflowRecord::new(wf.id(), "echo", params))
            .await
            .unwrap();

        wf.run(&CancellationToken::new(), &listener).await.unwrap();

        let (state, snapshots) = listener.restore(wf.id()).await.unwrap();
        assert_eq!(state, wf.state());
        let greet = &snapshots["greet"];
        assert!(greet.finished);
        assert_eq!(greet.result, Some(json!("hello, gopher")));
    }

    #[tokio::test]
    async fn restored_checkpoint_resumes_without_rerunning() {
        let listener = CheckpointListener::new(MemoryWorkflowRepository::new());
        let params = Params::from([("name".to_string(), json!("gopher"))]);
        let mut wf = Workflow::start(definition(), params.clone()).unwrap();
        listener
            .repo()
            .create_workflow(&WorkflowRecord::new(wf.id(), "echo", params))
            .await
            .unwrap();
        wf.run(&CancellationToken::new(), &listener).await.unwrap();

        let (state, snapshots) = listener.restore(wf.id()).await.unwrap();
        let mut resumed = Workflow::resume(definition(), &state, snapshots).unwrap();
        let outputs = resumed.run(&CancellationToken::new(), &listener).await.unwrap();
        assert_eq!(outputs["greeting"], json!("hello, gopher"));
    }

    #[tokio::test]
    async fn restore_unknown_workflow_fails() {
        let listener = CheckpointListener::new(MemoryWorkflowRepository::new());
        let err = listener.restore(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, CheckpointError::WorkflowNotFound(_)));
    }

    #[tokio::test]
    async fn storage_failure_is_reported_to_engine() {
        let listener = CheckpointListener::new(MemoryWorkflowRepository::new());
        let err = listener
            .step_state_changed(Uuid::now_v7(), "greet", &StepSnapshot::pending("greet"))
            .await
            .unwrap_err();
        assert!(matches!(err, ListenerError::Storage(_)));
    }
}
