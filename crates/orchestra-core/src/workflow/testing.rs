//! Shared mock collaborators for engine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use orchestra_types::agent::AgentResponse;
use orchestra_types::error::RepositoryError;
use orchestra_types::workflow::{
    Context, WorkflowDefinition, WorkflowExecution, WorkflowStatus, WorkflowStep,
};
use serde_json::Value;
use uuid::Uuid;

use super::invoker::AgentInvoker;
use crate::repository::execution::ExecutionStore;

// ---------------------------------------------------------------------------
// ScriptedInvoker
// ---------------------------------------------------------------------------

/// Replays scripted responses per agent type. The last scripted response
/// repeats; unscripted agent types succeed with an empty output.
pub(crate) struct ScriptedInvoker {
    scripts: Mutex<HashMap<String, VecDeque<AgentResponse>>>,
    calls: Mutex<Vec<(String, Context)>>,
    delay: Duration,
}

impl ScriptedInvoker {
    pub(crate) fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn script(self, agent_type: &str, responses: Vec<AgentResponse>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(agent_type.to_string(), responses.into());
        self
    }

    /// Every call sleeps this long before answering.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub(crate) fn calls_for(&self, agent_type: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == agent_type)
            .count()
    }

    pub(crate) fn inputs_for(&self, agent_type: &str) -> Vec<Context> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == agent_type)
            .map(|(_, input)| input.clone())
            .collect()
    }

    fn next_response(&self, agent_type: &str) -> AgentResponse {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(agent_type) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| AgentResponse::success(Context::new(), None)),
            None => AgentResponse::success(Context::new(), Some(format!("{agent_type}-agent"))),
        }
    }
}

impl AgentInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        agent_type: &str,
        input_data: &Context,
        _timeout: Duration,
    ) -> AgentResponse {
        self.calls
            .lock()
            .unwrap()
            .push((agent_type.to_string(), input_data.clone()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.next_response(agent_type)
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Records every stored execution and the status it was stored with.
#[derive(Default)]
pub(crate) struct MemoryStore {
    definitions: Mutex<HashMap<Uuid, WorkflowDefinition>>,
    executions: Mutex<HashMap<Uuid, WorkflowExecution>>,
    history: Mutex<Vec<(Uuid, WorkflowStatus)>>,
    fail_writes: AtomicBool,
    /// Applied before every execution write, so writes suspend.
    write_delay: Option<Duration>,
}

impl MemoryStore {
    pub(crate) fn failing() -> Self {
        let store = Self::default();
        store.fail_writes.store(true, Ordering::SeqCst);
        store
    }

    pub(crate) fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    pub(crate) fn stored(&self, id: &Uuid) -> Option<WorkflowExecution> {
        self.executions.lock().unwrap().get(id).cloned()
    }

    /// Statuses stored for `id`, in write order.
    pub(crate) fn status_history(&self, id: &Uuid) -> Vec<WorkflowStatus> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|(eid, _)| eid == id)
            .map(|(_, status)| *status)
            .collect()
    }
}

impl ExecutionStore for MemoryStore {
    async fn store_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        self.definitions.lock().unwrap().insert(def.id, def.clone());
        Ok(())
    }

    async fn get_definition(&self, id: &Uuid) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self.definitions.lock().unwrap().get(id).cloned())
    }

    async fn list_definitions(&self) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        Ok(self.definitions.lock().unwrap().values().cloned().collect())
    }

    async fn delete_definition(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self.definitions.lock().unwrap().remove(id).is_some())
    }

    async fn store_execution(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Connection);
        }
        self.history
            .lock()
            .unwrap()
            .push((execution.id, execution.status));
        self.executions
            .lock()
            .unwrap()
            .insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<WorkflowExecution>, RepositoryError> {
        Ok(self.stored(id))
    }

    async fn list_executions(
        &self,
        workflow_id: Option<&Uuid>,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        Ok(self
            .executions
            .lock()
            .unwrap()
            .values()
            .filter(|e| workflow_id.is_none_or(|w| e.workflow_id == *w))
            .filter(|e| status.is_none_or(|s| e.status == s))
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// A step whose agent type equals its id.
pub(crate) fn step(id: &str) -> WorkflowStep {
    WorkflowStep {
        id: id.to_string(),
        name: id.to_uppercase(),
        agent_type: id.to_string(),
        input_mapping: HashMap::new(),
        output_mapping: HashMap::new(),
        depends_on: Vec::new(),
        condition: None,
        timeout_secs: 5,
        retry_count: 0,
    }
}

pub(crate) fn step_after(id: &str, deps: &[&str]) -> WorkflowStep {
    WorkflowStep {
        depends_on: deps.iter().map(|d| d.to_string()).collect(),
        ..step(id)
    }
}

pub(crate) fn definition(steps: Vec<WorkflowStep>) -> WorkflowDefinition {
    WorkflowDefinition {
        id: Uuid::now_v7(),
        name: "test-workflow".to_string(),
        description: None,
        version: "1.0".to_string(),
        steps,
        global_timeout_secs: 60,
        created_at: chrono::Utc::now(),
        created_by: "system".to_string(),
    }
}

pub(crate) fn object(value: Value) -> Context {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

pub(crate) fn ok(output: Value) -> AgentResponse {
    AgentResponse::success(object(output), Some("agent-1".to_string()))
}
