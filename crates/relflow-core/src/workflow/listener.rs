//! The host persistence and notification contract.
//!
//! The run loop awaits each callback before continuing, so a host can make
//! step state durable before the engine acts on it. Callback errors are
//! logged and otherwise ignored.

use std::future::Future;
use std::sync::Arc;

use uuid::Uuid;

use relflow_types::error::ListenerError;
use relflow_types::workflow::StepSnapshot;

use super::context::{StepLogger, TracingLogger};

/// Receives step lifecycle transitions and stalls of a running workflow.
pub trait Listener: Send + Sync {
    /// Called on every state transition of a step, with a copy of its state.
    fn step_state_changed(
        &self,
        workflow_id: Uuid,
        step: &str,
        state: &StepSnapshot,
    ) -> impl Future<Output = Result<(), ListenerError>> + Send;

    /// Called when no step can run but the workflow is incomplete.
    fn workflow_stalled(&self, workflow_id: Uuid) -> impl Future<Output = Result<(), ListenerError>> + Send;

    /// The log sink handed to a step's executions.
    fn logger(&self, workflow_id: Uuid, step: &str) -> Arc<dyn StepLogger>;
}

impl<L: Listener> Listener for Arc<L> {
    fn step_state_changed(
        &self,
        workflow_id: Uuid,
        step: &str,
        state: &StepSnapshot,
    ) -> impl Future<Output = Result<(), ListenerError>> + Send {
        (**self).step_state_changed(workflow_id, step, state)
    }

    fn workflow_stalled(&self, workflow_id: Uuid) -> impl Future<Output = Result<(), ListenerError>> + Send {
        (**self).workflow_stalled(workflow_id)
    }

    fn logger(&self, workflow_id: Uuid, step: &str) -> Arc<dyn StepLogger> {
        (**self).logger(workflow_id, step)
    }
}

/// A listener that only reports to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingListener;

impl Listener for TracingListener {
    async fn step_state_changed(
        &self,
        workflow_id: Uuid,
        step: &str,
        state: &StepSnapshot,
    ) -> Result<(), ListenerError> {
        tracing::debug!(
            workflow_id = %workflow_id,
            step,
            status = %state.status(),
            retry_count = state.retry_count,
            "step state changed"
        );
        Ok(())
    }

    async fn workflow_stalled(&self, workflow_id: Uuid) -> Result<(), ListenerError> {
        tracing::warn!(workflow_id = %workflow_id, "workflow stalled");
        Ok(())
    }

    fn logger(&self, workflow_id: Uuid, step: &str) -> Arc<dyn StepLogger> {
        Arc::new(TracingLogger::new(workflow_id, step))
    }
}
