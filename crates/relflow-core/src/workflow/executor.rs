//! The run loop.
//!
//! One control flow per workflow owns the step-state map. Ready steps are
//! spawned as independent tokio tasks; each reports its final state over a
//! bounded result channel and never touches the map itself.
//!
//! # Loop iteration
//!
//! 1. Announce steps the listener has not seen yet.
//! 2. Stop if every step finished without error.
//! 3. Launch every ready, unstarted step (unless cancelled).
//! 4. If nothing is running: return on cancellation, otherwise report a stall.
//! 5. Wait for a step outcome, a manual retry request, or cancellation.
//!
//! Cancellation is observed once. After it, no new step is launched and the
//! loop keeps collecting outcomes until nothing is in flight.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as Json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::context::TaskContext;
use super::definition::{StepDefinition, StepFn, WorkflowError};
use super::instance::{RetryRequest, StepState, Workflow};
use super::listener::Listener;
use super::step_runner::{self, ExpansionRun, StepError, TaskRun};
use super::watchdog::Watchdog;

/// Outcome of one execution, sent back to the loop.
struct Finished {
    step: String,
    state: StepState,
}

impl Workflow {
    /// Drive the workflow until every step succeeds or `cancel` fires.
    ///
    /// Returns the evaluated outputs. A workflow that cannot make progress
    /// reports a stall to `listener` and keeps waiting for a manual retry or
    /// cancellation; stalling is not an error.
    pub async fn run<L: Listener>(
        &mut self,
        cancel: &CancellationToken,
        listener: &L,
    ) -> Result<HashMap<String, Json>, WorkflowError> {
        let token = cancel.child_token();
        let (done_tx, mut done_rx) = mpsc::channel::<Finished>(self.steps.len().max(1));
        let mut running = 0usize;
        let mut cancel_seen = false;

        self.recover_abandoned();
        tracing::info!(workflow_id = %self.id, steps = self.steps.len(), "running workflow");

        loop {
            self.announce_new_steps(listener).await;
            if self.is_complete() {
                break;
            }

            if !token.is_cancelled() {
                running += self.launch_ready(&token, listener, &done_tx).await;
            }
            if running == 0 {
                if token.is_cancelled() {
                    tracing::info!(workflow_id = %self.id, "workflow cancelled");
                    return Err(WorkflowError::Cancelled);
                }
                tracing::warn!(workflow_id = %self.id, "workflow stalled, waiting for a retry");
                if let Err(err) = listener.workflow_stalled(self.id).await {
                    tracing::warn!(workflow_id = %self.id, error = %err, "listener failed to record stall");
                }
            }

            tokio::select! {
                Some(done) = done_rx.recv() => {
                    running -= 1;
                    self.record_outcome(done, listener).await;
                }
                Some(request) = self.retry_rx.recv() => {
                    self.answer_retry(request, listener).await;
                }
                _ = token.cancelled(), if !cancel_seen => {
                    cancel_seen = true;
                    tracing::info!(workflow_id = %self.id, running, "cancellation requested, draining in-flight steps");
                }
            }

            if cancel_seen && running == 0 {
                tracing::info!(workflow_id = %self.id, "workflow cancelled");
                return Err(WorkflowError::Cancelled);
            }
        }

        let outputs = self.collect_outputs()?;
        tracing::info!(workflow_id = %self.id, outputs = outputs.len(), "workflow finished");
        Ok(outputs)
    }

    /// Steps left started by a run whose future was dropped can never report
    /// back; they start over.
    fn recover_abandoned(&mut self) {
        self.expanding = false;
        for (name, state) in self.steps.iter_mut() {
            if state.started && !state.finished {
                tracing::debug!(workflow_id = %self.id, step = %name, "restarting abandoned step");
                *state = StepState {
                    retry_count: state.retry_count,
                    ..StepState::default()
                };
            }
        }
    }

    async fn announce_new_steps<L: Listener>(&mut self, listener: &L) {
        let fresh: Vec<String> = self
            .steps
            .iter_mut()
            .filter(|(_, state)| !state.created)
            .map(|(name, state)| {
                state.created = true;
                name.clone()
            })
            .collect();
        for name in fresh {
            self.notify(listener, &name).await;
        }
    }

    async fn notify<L: Listener>(&self, listener: &L, step: &str) {
        let Some(state) = self.steps.get(step) else {
            return;
        };
        let snapshot = state.snapshot(step);
        if let Err(err) = listener.step_state_changed(self.id, step, &snapshot).await {
            tracing::warn!(workflow_id = %self.id, step, error = %err, "listener failed to record step state");
        }
    }

    /// Launch every ready step that has not started. Returns how many
    /// executions were spawned.
    async fn launch_ready<L: Listener>(
        &mut self,
        token: &CancellationToken,
        listener: &L,
        done: &mpsc::Sender<Finished>,
    ) -> usize {
        let ready: Vec<Arc<StepDefinition>> = self
            .def
            .steps
            .values()
            .filter(|step| self.steps.get(&step.name).is_some_and(|s| !s.started))
            .filter(|step| self.is_ready(step))
            .cloned()
            .collect();

        let mut launched = 0;
        for step in ready {
            let is_expansion = matches!(step.func, StepFn::Expansion(_));
            if is_expansion && self.expanding {
                continue;
            }

            let args = step
                .inputs
                .iter()
                .map(|value| value.evaluate(&*self))
                .collect::<Result<Vec<_>, _>>();
            let Some(state) = self.steps.get_mut(&step.name) else {
                continue;
            };
            state.started = true;
            let args = match args {
                Ok(args) => args,
                Err(err) => {
                    state.finished = true;
                    state.error = Some(err.to_string());
                    self.notify(listener, &step.name).await;
                    continue;
                }
            };
            let launch_state = state.clone();
            self.notify(listener, &step.name).await;

            let name = step.name.clone();
            let tx = done.clone();
            match &step.func {
                StepFn::Task(func) => {
                    let ctx = TaskContext::new(
                        self.id,
                        &name,
                        launch_state.retry_count,
                        token.child_token(),
                        listener.logger(self.id, &name),
                        Watchdog::new(self.config.watchdog_delay()),
                    );
                    let run = TaskRun {
                        func: Arc::clone(func),
                        state: launch_state,
                        args,
                        ctx,
                        config: self.config.clone(),
                    };
                    tokio::spawn(async move {
                        let state = step_runner::run_task(run).await;
                        let _ = tx.send(Finished { step: name, state }).await;
                    });
                }
                StepFn::Expansion(func) => {
                    self.expanding = true;
                    let run = ExpansionRun {
                        func: Arc::clone(func),
                        namespace: step.namespace.clone(),
                        state: launch_state,
                        args,
                        definition: self.def.clone(),
                    };
                    tokio::spawn(async move {
                        let state = step_runner::run_expansion(run);
                        let _ = tx.send(Finished { step: name, state }).await;
                    });
                }
            }
            tracing::debug!(workflow_id = %self.id, step = %step.name, kind = %step.kind, "step launched");
            launched += 1;
        }
        launched
    }

    async fn record_outcome<L: Listener>(&mut self, done: Finished, listener: &L) {
        let Finished { step, mut state } = done;

        let was_expansion = self
            .def
            .steps
            .get(&step)
            .is_some_and(|s| matches!(s.func, StepFn::Expansion(_)));
        if was_expansion {
            self.expanding = false;
        }
        if let Some(expanded) = state.expanded.take() {
            if let Err(err) = self.adopt_expansion(expanded) {
                tracing::warn!(workflow_id = %self.id, step = %step, error = %err, "expanded definition rejected");
                state.error = Some(StepError::Expansion(err.to_string()).to_string());
            }
        }

        tracing::debug!(
            workflow_id = %self.id,
            step = %step,
            finished = state.finished,
            failed = state.error.is_some(),
            retry_count = state.retry_count,
            "step reported"
        );
        self.steps.insert(step.clone(), state);
        self.notify(listener, &step).await;
    }

    async fn answer_retry<L: Listener>(&mut self, request: RetryRequest, listener: &L) {
        let RetryRequest { step, reply } = request;
        let verdict = self.reset_for_retry(&step);
        if verdict.is_ok() {
            self.notify(listener, &step).await;
        }
        let _ = reply.send(verdict);
    }

    fn collect_outputs(&self) -> Result<HashMap<String, Json>, WorkflowError> {
        self.def
            .outputs
            .iter()
            .map(|(name, value)| Ok((name.clone(), value.evaluate(self)?)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
