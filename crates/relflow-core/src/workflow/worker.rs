//! Host-side supervisor that runs many workflows concurrently.
//!
//! A `Worker` owns the checkpointing listener, spawns one task per workflow
//! run loop, and records each outcome in the repository. Shutting a worker
//! down cancels every run loop but leaves the workflows unfinished in
//! storage, so `resume_unfinished` picks them up on the next start.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use relflow_types::config::EngineConfig;
use relflow_types::error::RepositoryError;
use relflow_types::event::WorkflowEvent;
use relflow_types::workflow::{Params, WorkflowRecord};
use serde_json::Value as Json;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::{EventBus, EventListener};
use crate::repository::workflow::WorkflowRepository;

use super::checkpoint::{CheckpointError, CheckpointListener};
use super::definition::{Definition, WorkflowError};
use super::instance::{Workflow, WorkflowHandle};

type WorkerListener<R> = EventListener<CheckpointListener<R>>;

/// A workflow whose run loop is currently spawned.
struct RunningWorkflow {
    handle: WorkflowHandle,
    token: CancellationToken,
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Runs workflows against a repository and an event bus.
///
/// Generic over `R: WorkflowRepository` for storage flexibility.
pub struct Worker<R: WorkflowRepository + 'static> {
    listener: Arc<WorkerListener<R>>,
    config: EngineConfig,
    /// Run loops in flight, keyed by workflow id.
    running: Arc<DashMap<Uuid, RunningWorkflow>>,
    /// Parent of every run loop's cancellation token.
    shutdown: CancellationToken,
    tasks: Mutex<JoinSet<()>>,
}

impl<R: WorkflowRepository + 'static> Worker<R> {
    pub fn new(repo: R, event_bus: EventBus, config: EngineConfig) -> Self {
        Self {
            listener: Arc::new(EventListener::new(CheckpointListener::new(repo), event_bus)),
            config,
            running: Arc::new(DashMap::new()),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn repo(&self) -> &R {
        self.listener.inner().repo()
    }

    pub fn event_bus(&self) -> &EventBus {
        self.listener.bus()
    }

    /// Instantiate `def` with `params` and start running it.
    pub async fn start(&self, name: &str, def: Definition, params: Params) -> Result<Uuid, WorkerError> {
        let workflow = Workflow::start(def, params)?;
        self.submit(name, workflow).await
    }

    /// Record a freshly started workflow and spawn its run loop.
    ///
    /// Hosts that need to subscribe to the workflow's events before it
    /// runs call `Workflow::start` themselves and submit the result.
    pub async fn submit(&self, name: &str, workflow: Workflow) -> Result<Uuid, WorkerError> {
        let id = workflow.id();
        let record = WorkflowRecord::new(id, name, workflow.params().clone());
        self.repo().create_workflow(&record).await?;
        self.event_bus().publish(WorkflowEvent::WorkflowStarted {
            workflow_id: id,
            name: name.to_string(),
        });
        tracing::info!(workflow_id = %id, name, "workflow submitted");
        self.spawn(workflow.with_config(self.config.clone())).await;
        Ok(id)
    }

    /// Rebuild workflow `id` from its checkpoints and run it again.
    pub async fn resume(&self, id: Uuid, def: Definition) -> Result<Uuid, WorkerError> {
        if self.running.contains_key(&id) {
            return Err(WorkerError::AlreadyRunning(id));
        }
        let (state, snapshots) = self.listener.inner().restore(id).await?;
        let workflow = Workflow::resume(def, &state, snapshots)?;
        tracing::info!(workflow_id = %id, "workflow resumed from checkpoint");
        self.spawn(workflow.with_config(self.config.clone())).await;
        Ok(id)
    }

    /// Resume every unfinished workflow whose definition `lookup` knows.
    ///
    /// Workflows that cannot be resumed are logged and skipped. Returns the
    /// ids of the resumed workflows.
    pub async fn resume_unfinished<F>(&self, lookup: F) -> Result<Vec<Uuid>, WorkerError>
    where
        F: Fn(&str) -> Option<Definition>,
    {
        let mut resumed = Vec::new();
        for record in self.repo().list_unfinished_workflows().await? {
            if self.running.contains_key(&record.id) {
                continue;
            }
            let Some(def) = lookup(&record.name) else {
                tracing::warn!(workflow_id = %record.id, name = %record.name, "no definition for unfinished workflow");
                continue;
            };
            match self.resume(record.id, def).await {
                Ok(id) => resumed.push(id),
                Err(err) => {
                    tracing::warn!(workflow_id = %record.id, error = %err, "failed to resume workflow");
                }
            }
        }
        Ok(resumed)
    }

    /// Reset a failed step of a running workflow.
    pub async fn retry_task(&self, id: Uuid, step: &str) -> Result<(), WorkerError> {
        // Clone out of the map: awaiting while holding a DashMap guard would
        // block the run loop's own removal.
        let handle = self
            .running
            .get(&id)
            .map(|entry| entry.handle.clone())
            .ok_or(WorkerError::NotRunning(id))?;
        handle.retry_task(&self.shutdown, step).await?;
        tracing::info!(workflow_id = %id, step, "step retry requested");
        Ok(())
    }

    /// Cancel one workflow. It drains its in-flight steps and is then
    /// recorded as finished with a cancellation error.
    pub fn cancel(&self, id: Uuid) -> bool {
        match self.running.get(&id) {
            Some(entry) => {
                entry.token.cancel();
                tracing::info!(workflow_id = %id, "workflow cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Ids of the workflows whose run loop is active.
    pub fn running(&self) -> Vec<Uuid> {
        self.running.iter().map(|entry| *entry.key()).collect()
    }

    /// Wait for workflow `id` to leave the running set.
    pub async fn wait(&self, id: Uuid) {
        let mut finished = self.event_bus().subscribe_workflow(id);
        while self.running.contains_key(&id) {
            match finished.recv().await {
                Some(WorkflowEvent::WorkflowFinished { .. }) | None => break,
                Some(_) => {}
            }
        }
    }

    /// Cancel every run loop and wait for all of them to drain.
    ///
    /// Interrupted workflows stay unfinished in storage.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut tasks = self.tasks.lock().await;
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "workflow task failed to join");
            }
        }
        tracing::info!("worker shut down");
    }

    async fn spawn(&self, mut workflow: Workflow) {
        let id = workflow.id();
        let token = self.shutdown.child_token();
        self.running.insert(
            id,
            RunningWorkflow {
                handle: workflow.handle(),
                token: token.clone(),
            },
        );

        let listener = Arc::clone(&self.listener);
        let running = Arc::clone(&self.running);
        let shutdown = self.shutdown.clone();
        let mut tasks = self.tasks.lock().await;
        // Reap loops that already returned.
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            let result = workflow.run(&token, &listener).await;
            running.remove(&id);
            record_outcome(id, result, &shutdown, &listener).await;
        });
    }
}

/// Persist and announce how a run loop ended.
async fn record_outcome<R: WorkflowRepository>(
    id: Uuid,
    result: Result<HashMap<String, Json>, WorkflowError>,
    shutdown: &CancellationToken,
    listener: &WorkerListener<R>,
) {
    let repo = listener.inner().repo();
    let (outputs, error) = match result {
        Err(WorkflowError::Cancelled) if shutdown.is_cancelled() => {
            tracing::info!(workflow_id = %id, "workflow interrupted by shutdown, left resumable");
            return;
        }
        Ok(outputs) => {
            tracing::info!(workflow_id = %id, outputs = outputs.len(), "workflow completed");
            (Some(outputs), None)
        }
        Err(err) => {
            tracing::warn!(workflow_id = %id, error = %err, "workflow ended with error");
            (None, Some(err.to_string()))
        }
    };

    if let Err(err) = repo.mark_finished(&id, outputs.as_ref(), error.as_deref()).await {
        tracing::error!(workflow_id = %id, error = %err, "failed to record workflow outcome");
    }
    listener.bus().publish(WorkflowEvent::WorkflowFinished {
        workflow_id: id,
        outputs,
        error,
    });
}

// ---------------------------------------------------------------------------
// WorkerError
// ---------------------------------------------------------------------------

/// Errors from worker operations.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("workflow {0} is not running")]
    NotRunning(Uuid),

    #[error("workflow {0} is already running")]
    AlreadyRunning(Uuid),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
