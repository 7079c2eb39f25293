//! Event types for the relflow workflow event bus.
//!
//! `WorkflowEvent` mirrors the listener callbacks so that UI observers can
//! subscribe without implementing a listener themselves. All variants are
//! Clone + Send + Sync for use with tokio broadcast channels.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::StepSnapshot;

/// Events emitted while workflows execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A workflow execution has been started by a host.
    WorkflowStarted { workflow_id: Uuid, name: String },

    /// A step changed lifecycle state.
    StepStateChanged {
        workflow_id: Uuid,
        step: String,
        state: StepSnapshot,
    },

    /// Nothing is runnable but the workflow is incomplete.
    WorkflowStalled { workflow_id: Uuid },

    /// The run loop returned.
    WorkflowFinished {
        workflow_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        outputs: Option<HashMap<String, serde_json::Value>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl WorkflowEvent {
    /// The workflow this event belongs to.
    pub fn workflow_id(&self) -> Uuid {
        match self {
            WorkflowEvent::WorkflowStarted { workflow_id, .. }
            | WorkflowEvent::StepStateChanged { workflow_id, .. }
            | WorkflowEvent::WorkflowStalled { workflow_id }
            | WorkflowEvent::WorkflowFinished { workflow_id, .. } => *workflow_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_type_tag() {
        let id = Uuid::nil();
        let event = WorkflowEvent::WorkflowStalled { workflow_id: id };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "workflow_stalled");
        assert_eq!(event.workflow_id(), id);
    }

    #[test]
    fn step_event_roundtrip() {
        let event = WorkflowEvent::StepStateChanged {
            workflow_id: Uuid::now_v7(),
            step: "echo".to_string(),
            state: StepSnapshot::pending("echo"),
        };
        let json = serde_json::to_string(&event).unwrap();
        let parsed: WorkflowEvent = serde_json::from_str(&json).unwrap();
        match parsed {
            WorkflowEvent::StepStateChanged { step, state, .. } => {
                assert_eq!(step, "echo");
                assert!(!state.started);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
