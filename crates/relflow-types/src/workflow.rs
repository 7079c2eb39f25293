//! Durable workflow state shapes.
//!
//! These are the records a host stores and hands back to the engine on
//! resume: the shallow `WorkflowState` (id + parameter bindings) and one
//! `StepSnapshot` per step, emitted by the engine on every lifecycle
//! transition. `WorkflowRecord` is the host-side row describing a whole
//! execution.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Parameter bindings for one workflow execution, keyed by parameter name.
pub type Params = HashMap<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// WorkflowState
// ---------------------------------------------------------------------------

/// The shallow state of a workflow execution.
///
/// Together with the step snapshots this is everything `Resume` needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Execution identifier, stable across resumes.
    pub id: Uuid,
    /// Concrete parameter bindings.
    #[serde(default)]
    pub params: Params,
}

// ---------------------------------------------------------------------------
// StepSnapshot
// ---------------------------------------------------------------------------

/// Snapshot of a single step, as reported through the listener.
///
/// Once `finished` is true, either `serialized_result` or `error` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepSnapshot {
    /// Fully qualified step name.
    pub name: String,
    pub started: bool,
    pub finished: bool,
    /// Plain JSON form of the result, for display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Type-tagged JSON envelope of the result, used on resume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serialized_result: Option<String>,
    /// Rendered error message, if the step failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Number of retries already consumed.
    #[serde(default)]
    pub retry_count: u32,
}

impl StepSnapshot {
    /// A snapshot for a step that has not run yet.
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Derive a display status from the lifecycle flags.
    pub fn status(&self) -> StepStatus {
        match (self.started, self.finished, self.error.is_some()) {
            (_, true, true) => StepStatus::Failed,
            (_, true, false) => StepStatus::Succeeded,
            (true, false, _) => StepStatus::Running,
            (false, false, _) => StepStatus::Pending,
        }
    }
}

/// Display status of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// WorkflowRecord
// ---------------------------------------------------------------------------

/// Host-side record of a workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: Uuid,
    /// Name of the definition this execution was started from.
    pub name: String,
    #[serde(default)]
    pub params: Params,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished: bool,
    /// Registered outputs, once the workflow completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<HashMap<String, serde_json::Value>>,
    /// Error that ended the run (cancellation or instantiation failure).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowRecord {
    /// A fresh, unfinished record.
    pub fn new(id: Uuid, name: impl Into<String>, params: Params) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            params,
            created_at: now,
            updated_at: now,
            finished: false,
            outputs: None,
            error: None,
        }
    }

    /// The shallow state needed to resume this execution.
    pub fn state(&self) -> WorkflowState {
        WorkflowState {
            id: self.id,
            params: self.params.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn snapshot_status_follows_flags() {
        let mut snap = StepSnapshot::pending("build");
        assert_eq!(snap.status(), StepStatus::Pending);

        snap.started = true;
        assert_eq!(snap.status(), StepStatus::Running);

        snap.finished = true;
        snap.result = Some(json!("ok"));
        assert_eq!(snap.status(), StepStatus::Succeeded);

        snap.error = Some("boom".to_string());
        assert_eq!(snap.status(), StepStatus::Failed);
    }

    #[test]
    fn snapshot_deserializes_with_defaults() {
        let snap: StepSnapshot = serde_json::from_str(r#"{"name":"echo","started":false,"finished":false}"#).unwrap();
        assert_eq!(snap.retry_count, 0);
        assert!(snap.serialized_result.is_none());
        assert!(snap.error.is_none());
    }

    #[test]
    fn record_state_carries_id_and_params() {
        let id = Uuid::now_v7();
        let mut params = Params::new();
        params.insert("greeting".to_string(), json!("hi"));
        let record = WorkflowRecord::new(id, "echo", params.clone());

        let state = record.state();
        assert_eq!(state.id, id);
        assert_eq!(state.params, params);
        assert!(!record.finished);
    }

    #[test]
    fn status_display() {
        assert_eq!(StepStatus::Failed.to_string(), "failed");
        assert_eq!(StepStatus::Pending.to_string(), "pending");
    }
}
