//! Workflow instances: a Definition bound to parameters, plus the state of
//! every step.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value as Json;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use relflow_types::config::EngineConfig;
use relflow_types::workflow::{Params, StepSnapshot, WorkflowState};

use super::codec;
use super::definition::{Definition, StepDefinition, StepKind, WorkflowError};
use super::value::Environment;

// ---------------------------------------------------------------------------
// StepState
// ---------------------------------------------------------------------------

/// Engine-side state of one step.
#[derive(Debug, Clone, Default)]
pub(crate) struct StepState {
    /// The listener has been told the step exists.
    pub created: bool,
    pub started: bool,
    pub finished: bool,
    pub result: Option<Json>,
    pub serialized_result: Option<String>,
    pub error: Option<String>,
    pub retry_count: u32,
    /// Definition produced by a successful expansion, until the run loop
    /// adopts it.
    pub expanded: Option<Definition>,
}

impl StepState {
    /// A fresh state for the next attempt of this step.
    pub fn next_attempt(&self) -> Self {
        Self {
            created: true,
            retry_count: self.retry_count + 1,
            ..Self::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.finished && self.error.is_none()
    }

    pub fn snapshot(&self, name: &str) -> StepSnapshot {
        StepSnapshot {
            name: name.to_string(),
            started: self.started,
            finished: self.finished,
            result: self.result.clone(),
            serialized_result: self.serialized_result.clone(),
            error: self.error.clone(),
            retry_count: self.retry_count,
        }
    }

    /// Rebuild a step's state from a stored snapshot.
    ///
    /// Finished tasks and actions keep their outcome; everything else,
    /// including every expansion, starts over.
    pub fn restore(step: &StepDefinition, snapshot: &StepSnapshot) -> Result<Self, WorkflowError> {
        let mut state = Self {
            created: true,
            retry_count: snapshot.retry_count,
            ..Self::default()
        };
        if !snapshot.finished || step.kind == StepKind::Expansion {
            return Ok(state);
        }

        state.started = true;
        state.finished = true;
        if let Some(error) = &snapshot.error {
            state.error = Some(error.clone());
            return Ok(state);
        }
        let serialized = snapshot
            .serialized_result
            .as_deref()
            .ok_or_else(|| WorkflowError::InvalidSnapshot {
                step: step.name.clone(),
                reason: "finished without a serialized result".to_string(),
            })?;
        state.result = Some(codec::decode_snapshot(step, serialized)?);
        state.serialized_result = Some(serialized.to_string());
        Ok(state)
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A request to reset a failed step, answered by the run loop.
pub(crate) struct RetryRequest {
    pub step: String,
    pub reply: oneshot::Sender<Result<(), WorkflowError>>,
}

/// A running (or runnable) instance of a Definition.
pub struct Workflow {
    pub(crate) id: Uuid,
    pub(crate) def: Definition,
    pub(crate) params: Params,
    pub(crate) steps: BTreeMap<String, StepState>,
    /// Snapshots supplied on resume, consulted again when an expansion
    /// re-registers steps that existed before the interruption.
    pub(crate) saved: HashMap<String, StepSnapshot>,
    pub(crate) config: EngineConfig,
    /// An expansion is in flight. Expansions replace the whole Definition,
    /// so only one may run at a time.
    pub(crate) expanding: bool,
    pub(crate) retry_tx: mpsc::Sender<RetryRequest>,
    pub(crate) retry_rx: mpsc::Receiver<RetryRequest>,
}

impl Workflow {
    /// Instantiate `def` with fresh state after validating it and `params`.
    pub fn start(def: Definition, params: Params) -> Result<Self, WorkflowError> {
        def.validate(&params)?;
        let steps = def
            .steps
            .keys()
            .map(|name| (name.clone(), StepState::default()))
            .collect();
        let workflow = Self::assemble(Uuid::now_v7(), def, params, steps, HashMap::new());
        tracing::info!(workflow_id = %workflow.id, steps = workflow.steps.len(), "workflow started");
        Ok(workflow)
    }

    /// Rebuild an interrupted workflow from its stored state.
    ///
    /// Every step currently in `def` needs a snapshot. Finished tasks and
    /// actions keep their outcome; unfinished steps and expansions run again.
    pub fn resume(
        def: Definition,
        state: &WorkflowState,
        snapshots: HashMap<String, StepSnapshot>,
    ) -> Result<Self, WorkflowError> {
        def.validate(&state.params)?;
        let mut steps = BTreeMap::new();
        for (name, step) in &def.steps {
            let snapshot = snapshots
                .get(name)
                .ok_or_else(|| WorkflowError::MissingStepState(name.clone()))?;
            steps.insert(name.clone(), StepState::restore(step, snapshot)?);
        }
        let workflow = Self::assemble(state.id, def, state.params.clone(), steps, snapshots);
        tracing::info!(workflow_id = %workflow.id, steps = workflow.steps.len(), "workflow resumed");
        Ok(workflow)
    }

    fn assemble(
        id: Uuid,
        def: Definition,
        params: Params,
        steps: BTreeMap<String, StepState>,
        saved: HashMap<String, StepSnapshot>,
    ) -> Self {
        let (retry_tx, retry_rx) = mpsc::channel(steps.len().max(1));
        Self {
            id,
            def,
            params,
            steps,
            saved,
            config: EngineConfig::default(),
            expanding: false,
            retry_tx,
            retry_rx,
        }
    }

    /// Use `config` for retry budget and watchdog interval.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// The current Definition, including steps added by expansions.
    pub fn definition(&self) -> &Definition {
        &self.def
    }

    /// The shallow state a host needs to resume this workflow.
    pub fn state(&self) -> WorkflowState {
        WorkflowState {
            id: self.id,
            params: self.params.clone(),
        }
    }

    /// Snapshot of one step.
    pub fn step_snapshot(&self, name: &str) -> Option<StepSnapshot> {
        self.steps.get(name).map(|s| s.snapshot(name))
    }

    /// Snapshots of every step, ordered by name.
    pub fn snapshots(&self) -> Vec<StepSnapshot> {
        self.steps.iter().map(|(name, s)| s.snapshot(name)).collect()
    }

    /// A handle for sending retry requests to this workflow while it runs.
    pub fn handle(&self) -> WorkflowHandle {
        WorkflowHandle {
            id: self.id,
            requests: self.retry_tx.clone(),
        }
    }

    /// Reset a step that finished in failure, while the workflow is not
    /// running. The next `run` starts it again.
    pub fn retry_task(&mut self, step: &str) -> Result<(), WorkflowError> {
        self.reset_for_retry(step)
    }

    pub(crate) fn reset_for_retry(&mut self, step: &str) -> Result<(), WorkflowError> {
        let state = self
            .steps
            .get_mut(step)
            .ok_or_else(|| WorkflowError::UnknownStep(step.to_string()))?;
        if !state.finished || state.error.is_none() {
            return Err(WorkflowError::NotRetryable(step.to_string()));
        }
        *state = state.next_attempt();
        tracing::info!(workflow_id = %self.id, step, retry_count = state.retry_count, "step reset for manual retry");
        Ok(())
    }

    /// Whether every dependency of `step` has finished successfully.
    pub(crate) fn is_ready(&self, step: &StepDefinition) -> bool {
        step.dependencies()
            .iter()
            .all(|dep| self.steps.get(dep).is_some_and(StepState::succeeded))
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.steps.values().all(StepState::succeeded)
    }

    /// Replace the Definition with one produced by an expansion.
    ///
    /// The new Definition is validated first; on failure nothing changes.
    /// Steps it adds take their state from the resume snapshots when present.
    pub(crate) fn adopt_expansion(&mut self, def: Definition) -> Result<(), WorkflowError> {
        def.validate(&self.params)?;
        let mut added = Vec::new();
        for (name, step) in &def.steps {
            if self.steps.contains_key(name) {
                continue;
            }
            let state = match self.saved.get(name) {
                Some(snapshot) => StepState::restore(step, snapshot)?,
                None => StepState::default(),
            };
            added.push((name.clone(), state));
        }
        tracing::debug!(workflow_id = %self.id, added = added.len(), "adopting expanded definition");
        self.def = def;
        self.steps.extend(added);
        Ok(())
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("id", &self.id)
            .field("def", &self.def)
            .field("steps", &self.steps.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Environment for Workflow {
    fn param(&self, name: &str) -> Option<&Json> {
        self.params.get(name)
    }

    fn step_result(&self, step: &str) -> Option<&Json> {
        self.steps.get(step).and_then(|s| s.result.as_ref())
    }
}

// ---------------------------------------------------------------------------
// WorkflowHandle
// ---------------------------------------------------------------------------

/// Cloneable handle addressing a workflow from outside its run loop.
#[derive(Debug, Clone)]
pub struct WorkflowHandle {
    id: Uuid,
    requests: mpsc::Sender<RetryRequest>,
}

impl WorkflowHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Ask the run loop to reset a step that finished in failure.
    ///
    /// Requests sent while the workflow is between runs are answered by the
    /// next run. Gives up with `Cancelled` if `cancel` fires first.
    pub async fn retry_task(&self, cancel: &CancellationToken, step: &str) -> Result<(), WorkflowError> {
        let (reply, response) = oneshot::channel();
        let request = RetryRequest {
            step: step.to_string(),
            reply,
        };
        tokio::select! {
            sent = self.requests.send(request) => sent.map_err(|_| WorkflowError::NotRunning(self.id))?,
            _ = cancel.cancelled() => return Err(WorkflowError::Cancelled),
        }
        tokio::select! {
            verdict = response => verdict.map_err(|_| WorkflowError::NotRunning(self.id))?,
            _ = cancel.cancelled() => Err(WorkflowError::Cancelled),
        }
    }
}

impl std::fmt::Debug for RetryRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryRequest").field("step", &self.step).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
