//! Listener adapter that mirrors engine callbacks onto the event bus.

use std::sync::Arc;

use relflow_types::error::ListenerError;
use relflow_types::event::WorkflowEvent;
use relflow_types::workflow::StepSnapshot;
use uuid::Uuid;

use crate::workflow::context::StepLogger;
use crate::workflow::listener::Listener;

use super::bus::EventBus;

/// Wraps a listener and publishes every callback as a `WorkflowEvent`.
///
/// The inner listener runs first; the event is published whatever it
/// returns, and its result is passed through.
pub struct EventListener<L> {
    inner: L,
    bus: EventBus,
}

impl<L> EventListener<L> {
    pub fn new(inner: L, bus: EventBus) -> Self {
        Self { inner, bus }
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}

impl<L: Listener> Listener for EventListener<L> {
    async fn step_state_changed(
        &self,
        workflow_id: Uuid,
        step: &str,
        state: &StepSnapshot,
    ) -> Result<(), ListenerError> {
        let result = self.inner.step_state_changed(workflow_id, step, state).await;
        self.bus.publish(WorkflowEvent::StepStateChanged {
            workflow_id,
            step: step.to_string(),
            state: state.clone(),
        });
        result
    }

    async fn workflow_stalled(&self, workflow_id: Uuid) -> Result<(), ListenerError> {
        let result = self.inner.workflow_stalled(workflow_id).await;
        self.bus.publish(WorkflowEvent::WorkflowStalled { workflow_id });
        result
    }

    fn logger(&self, workflow_id: Uuid, step: &str) -> Arc<dyn StepLogger> {
        self.inner.logger(workflow_id, step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::listener::TracingListener;

    #[tokio::test]
    async fn callbacks_are_published() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let listener = EventListener::new(TracingListener, bus);
        let id = Uuid::now_v7();

        listener
            .step_state_changed(id, "build", &StepSnapshot::pending("build"))
            .await
            .unwrap();
        listener.workflow_stalled(id).await.unwrap();

        match rx.recv().await.unwrap() {
            WorkflowEvent::StepStateChanged { workflow_id, step, .. } => {
                assert_eq!(workflow_id, id);
                assert_eq!(step, "build");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(rx.recv().await.unwrap(), WorkflowEvent::WorkflowStalled { .. }));
    }
}
