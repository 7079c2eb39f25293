//! In-process `WorkflowRepository` backed by `DashMap`.
//!
//! Nothing survives the process; useful for tests and for hosts that only
//! need checkpoints to restart a workflow within one run.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use dashmap::DashMap;
use relflow_types::error::RepositoryError;
use relflow_types::workflow::{StepSnapshot, WorkflowRecord};
use uuid::Uuid;

use super::workflow::WorkflowRepository;

#[derive(Debug, Default)]
pub struct MemoryWorkflowRepository {
    workflows: DashMap<Uuid, WorkflowRecord>,
    steps: DashMap<Uuid, BTreeMap<String, StepSnapshot>>,
}

impl MemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkflowRepository for MemoryWorkflowRepository {
    async fn create_workflow(&self, record: &WorkflowRecord) -> Result<(), RepositoryError> {
        if self.workflows.contains_key(&record.id) {
            return Err(RepositoryError::Conflict(format!("workflow {} already exists", record.id)));
        }
        self.workflows.insert(record.id, record.clone());
        Ok(())
    }

    async fn get_workflow(&self, id: &Uuid) -> Result<Option<WorkflowRecord>, RepositoryError> {
        Ok(self.workflows.get(id).map(|r| r.clone()))
    }

    async fn list_workflows(&self, limit: u32) -> Result<Vec<WorkflowRecord>, RepositoryError> {
        let mut records: Vec<WorkflowRecord> = self.workflows.iter().map(|r| r.clone()).collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        records.truncate(limit as usize);
        Ok(records)
    }

    async fn list_unfinished_workflows(&self) -> Result<Vec<WorkflowRecord>, RepositoryError> {
        let mut records: Vec<WorkflowRecord> = self
            .workflows
            .iter()
            .filter(|r| !r.finished)
            .map(|r| r.clone())
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn mark_finished(
        &self,
        id: &Uuid,
        outputs: Option<&HashMap<String, serde_json::Value>>,
        error: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let mut record = self.workflows.get_mut(id).ok_or(RepositoryError::NotFound)?;
        record.finished = true;
        record.outputs = outputs.cloned();
        record.error = error.map(str::to_string);
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn upsert_step(&self, workflow_id: &Uuid, snapshot: &StepSnapshot) -> Result<(), RepositoryError> {
        if !self.workflows.contains_key(workflow_id) {
            return Err(RepositoryError::NotFound);
        }
        self.steps
            .entry(*workflow_id)
            .or_default()
            .insert(snapshot.name.clone(), snapshot.clone());
        Ok(())
    }

    async fn list_steps(&self, workflow_id: &Uuid) -> Result<Vec<StepSnapshot>, RepositoryError> {
        Ok(self
            .steps
            .get(workflow_id)
            .map(|steps| steps.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relflow_types::workflow::Params;
    use serde_json::json;

    #[tokio::test]
    async fn create_and_finish_workflow() {
        let repo = MemoryWorkflowRepository::new();
        let record = WorkflowRecord::new(Uuid::now_v7(), "echo", Params::new());
        repo.create_workflow(&record).await.unwrap();
        assert!(repo.create_workflow(&record).await.is_err());

        assert_eq!(repo.list_unfinished_workflows().await.unwrap().len(), 1);

        let outputs = HashMap::from([("greeting".to_string(), json!("hi"))]);
        repo.mark_finished(&record.id, Some(&outputs), None).await.unwrap();

        let stored = repo.get_workflow(&record.id).await.unwrap().unwrap();
        assert!(stored.finished);
        assert_eq!(stored.outputs, Some(outputs));
        assert!(repo.list_unfinished_workflows().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_replaces_step_snapshot() {
        let repo = MemoryWorkflowRepository::new();
        let record = WorkflowRecord::new(Uuid::now_v7(), "echo", Params::new());
        repo.create_workflow(&record).await.unwrap();

        let mut snap = StepSnapshot::pending("greet");
        repo.upsert_step(&record.id, &snap).await.unwrap();
        snap.started = true;
        repo.upsert_step(&record.id, &snap).await.unwrap();

        let steps = repo.list_steps(&record.id).await.unwrap();
        assert_eq!(steps.len(), 1);
        assert!(steps[0].started);
    }

    #[tokio::test]
    async fn upsert_for_unknown_workflow_fails() {
        let repo = MemoryWorkflowRepository::new();
        let err = repo
            .upsert_step(&Uuid::now_v7(), &StepSnapshot::pending("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }
}
