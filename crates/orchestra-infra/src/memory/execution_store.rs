//! In-memory execution store.
//!
//! Implements `ExecutionStore` from `orchestra-core` with two `DashMap`s.
//! Records are cloned in and out, so callers never share a live reference
//! with the store. Nothing survives the process.

use dashmap::DashMap;
use orchestra_core::repository::execution::ExecutionStore;
use orchestra_types::error::RepositoryError;
use orchestra_types::workflow::{WorkflowDefinition, WorkflowExecution, WorkflowStatus};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct InMemoryExecutionStore {
    definitions: DashMap<Uuid, WorkflowDefinition>,
    executions: DashMap<Uuid, WorkflowExecution>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionStore for InMemoryExecutionStore {
    async fn store_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        self.definitions.insert(def.id, def.clone());
        tracing::debug!(workflow_id = %def.id, name = %def.name, "stored workflow definition");
        Ok(())
    }

    async fn get_definition(&self, id: &Uuid) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self.definitions.get(id).map(|d| d.value().clone()))
    }

    async fn list_definitions(&self) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let mut defs: Vec<_> = self.definitions.iter().map(|d| d.value().clone()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(defs)
    }

    async fn delete_definition(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self.definitions.remove(id).is_some())
    }

    async fn store_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        self.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
        Ok(self.executions.get(id).map(|e| e.value().clone()))
    }

    async fn list_executions(
        &self,
        workflow_id: Option<&Uuid>,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        let mut executions: Vec<_> = self
            .executions
            .iter()
            .filter(|e| workflow_id.is_none_or(|w| e.workflow_id == *w))
            .filter(|e| status.is_none_or(|s| e.status == s))
            .map(|e| e.value().clone())
            .collect();
        // Newest first; never-started records sort last, ties broken by the
        // time-ordered id.
        executions.sort_by(|a, b| b.start_time.cmp(&a.start_time).then(b.id.cmp(&a.id)));
        Ok(executions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use orchestra_types::workflow::Context;

    fn definition(name: &str) -> WorkflowDefinition {
        serde_json::from_value(serde_json::json!({ "name": name, "steps": [] })).unwrap()
    }

    fn execution(workflow_id: Uuid, status: WorkflowStatus, minutes_ago: Option<i64>) -> WorkflowExecution {
        let mut exec = WorkflowExecution::new(workflow_id, Context::new());
        exec.status = status;
        exec.start_time = minutes_ago.map(|m| Utc::now() - Duration::minutes(m));
        exec
    }

    #[tokio::test]
    async fn definition_crud() {
        let store = InMemoryExecutionStore::new();
        let b = definition("billing");
        let a = definition("audit");
        store.store_definition(&b).await.unwrap();
        store.store_definition(&a).await.unwrap();

        assert_eq!(store.get_definition(&a.id).await.unwrap(), Some(a.clone()));
        let names: Vec<_> = store
            .list_definitions()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["audit", "billing"]);

        assert!(store.delete_definition(&a.id).await.unwrap());
        assert!(!store.delete_definition(&a.id).await.unwrap());
        assert!(store.get_definition(&a.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn store_execution_replaces_by_id() {
        let store = InMemoryExecutionStore::new();
        let mut exec = execution(Uuid::now_v7(), WorkflowStatus::Pending, None);
        store.store_execution(&exec).await.unwrap();

        exec.status = WorkflowStatus::Completed;
        store.store_execution(&exec).await.unwrap();

        let stored = store.get_execution(&exec.id).await.unwrap().unwrap();
        assert_eq!(stored.status, WorkflowStatus::Completed);
        assert_eq!(store.list_executions(None, None).await.unwrap().len(), 1);
        assert!(store.get_execution(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_executions_filters_and_orders_newest_first() {
        let store = InMemoryExecutionStore::new();
        let wf = Uuid::now_v7();
        let other = Uuid::now_v7();

        let old = execution(wf, WorkflowStatus::Completed, Some(30));
        let new = execution(wf, WorkflowStatus::Failed, Some(1));
        let pending = execution(wf, WorkflowStatus::Pending, None);
        let foreign = execution(other, WorkflowStatus::Completed, Some(5));
        for e in [&old, &pending, &foreign, &new] {
            store.store_execution(e).await.unwrap();
        }

        let ids: Vec<_> = store
            .list_executions(Some(&wf), None)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![new.id, old.id, pending.id]);

        let completed = store
            .list_executions(None, Some(WorkflowStatus::Completed))
            .await
            .unwrap();
        assert_eq!(completed.len(), 2);
        assert_eq!(completed[0].id, foreign.id);

        let none = store
            .list_executions(Some(&other), Some(WorkflowStatus::Failed))
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
