//! Workflow domain types for orchestra.
//!
//! Two families live here:
//! - the immutable template (`WorkflowDefinition`, `WorkflowStep`), authored
//!   as YAML/JSON and never mutated once stored;
//! - the mutable run record (`WorkflowExecution`, `StepExecution`) that the
//!   engine owns while a run is in flight and hands to the store after every
//!   status change.
//!
//! Checkpoints (`WorkflowCheckpoint`) are ephemeral snapshots used only for
//! rollback and are never the system of record.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Run-scoped shared key/value store that steps read from and write to.
pub type Context = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// Workflow Definition (immutable template)
// ---------------------------------------------------------------------------

/// An immutable workflow template: ordered steps plus their data-flow and
/// dependency graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// UUIDv7 assigned at authoring time.
    #[serde(default = "Uuid::now_v7", alias = "workflow_id")]
    pub id: Uuid,
    /// Human-readable workflow name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
    /// Steps in definition order. Scan passes attempt steps in this order.
    pub steps: Vec<WorkflowStep>,
    /// Whole-run deadline in seconds.
    #[serde(default = "default_global_timeout", alias = "global_timeout")]
    pub global_timeout_secs: u64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_created_by")]
    pub created_by: String,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_global_timeout() -> u64 {
    3600
}

fn default_created_by() -> String {
    "system".to_string()
}

impl WorkflowDefinition {
    /// Look up a step by its id.
    pub fn step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }
}

// ---------------------------------------------------------------------------
// Workflow Step
// ---------------------------------------------------------------------------

/// A single unit of work dispatched to an external agent capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Step id, unique within its definition.
    #[serde(alias = "step_id")]
    pub id: String,
    /// Display name, used in failure messages.
    pub name: String,
    /// Agent capability type the step is dispatched to.
    pub agent_type: String,
    /// Step input key -> mapping expression.
    #[serde(default)]
    pub input_mapping: HashMap<String, String>,
    /// Step output key -> context path (dot-path aware).
    #[serde(default)]
    pub output_mapping: HashMap<String, String>,
    /// Step ids that must reach a terminal status before this step may run.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Optional condition; when it evaluates false the step is skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Per-call timeout in seconds.
    #[serde(default = "default_step_timeout", alias = "timeout")]
    pub timeout_secs: u64,
    /// Retries allowed after the first attempt.
    #[serde(default)]
    pub retry_count: u32,
}

fn default_step_timeout() -> u64 {
    300
}

impl WorkflowStep {
    /// Total attempts this step may consume (first attempt plus retries).
    pub fn max_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }
}

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Overall status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the run has finished (successfully or not).
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single step within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }

    /// Terminal statuses satisfy dependents regardless of success.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Step Execution
// ---------------------------------------------------------------------------

/// Runtime record for one step of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_id: String,
    pub execution_id: Uuid,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Resolved input sent to the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_data: Option<Context>,
    /// Output returned by the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_data: Option<Context>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Identifier of the agent instance that served the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Retries consumed so far (0 on the first attempt).
    #[serde(default)]
    pub retry_attempt: u32,
}

impl StepExecution {
    /// Fresh PENDING record for a step.
    pub fn new(step_id: impl Into<String>, execution_id: Uuid) -> Self {
        Self {
            step_id: step_id.into(),
            execution_id,
            status: StepStatus::Pending,
            start_time: None,
            end_time: None,
            input_data: None,
            output_data: None,
            error_message: None,
            agent_id: None,
            retry_attempt: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow Execution
// ---------------------------------------------------------------------------

/// One run of a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    #[serde(alias = "execution_id")]
    pub id: Uuid,
    pub workflow_id: Uuid,
    #[serde(default)]
    pub status: WorkflowStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Caller-supplied seed values, copied into `context` at run start.
    #[serde(default)]
    pub input_data: Context,
    /// Shared mutable store that grows as steps produce output.
    #[serde(default)]
    pub context: Context,
    /// One record per definition step, in definition order.
    #[serde(default)]
    pub step_executions: Vec<StepExecution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default = "default_created_by")]
    pub created_by: String,
}

impl WorkflowExecution {
    /// New PENDING execution of `workflow_id` seeded with `input_data`.
    pub fn new(workflow_id: Uuid, input_data: Context) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_id,
            status: WorkflowStatus::Pending,
            start_time: None,
            end_time: None,
            input_data,
            context: Context::new(),
            step_executions: Vec::new(),
            error_message: None,
            created_by: default_created_by(),
        }
    }

    pub fn step_execution(&self, step_id: &str) -> Option<&StepExecution> {
        self.step_executions.iter().find(|s| s.step_id == step_id)
    }

    pub fn step_execution_mut(&mut self, step_id: &str) -> Option<&mut StepExecution> {
        self.step_executions.iter_mut().find(|s| s.step_id == step_id)
    }

    /// Current status of every step, keyed by step id.
    pub fn step_states(&self) -> HashMap<String, StepStatus> {
        self.step_executions
            .iter()
            .map(|s| (s.step_id.clone(), s.status))
            .collect()
    }

    /// Summarize how far the run has progressed.
    pub fn progress(&self) -> ExecutionProgress {
        let total_steps = self.step_executions.len();
        let completed_steps = self
            .step_executions
            .iter()
            .filter(|s| s.status.is_terminal())
            .count();
        let progress_percentage = if total_steps > 0 {
            let raw = completed_steps as f64 / total_steps as f64 * 100.0;
            (raw * 100.0).round() / 100.0
        } else {
            0.0
        };
        let current_step = self
            .step_executions
            .iter()
            .find(|s| s.status == StepStatus::Running)
            .map(|s| s.step_id.clone());

        ExecutionProgress {
            execution_id: self.id,
            status: self.status,
            total_steps,
            completed_steps,
            progress_percentage,
            current_step,
        }
    }
}

/// Progress summary of an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionProgress {
    pub execution_id: Uuid,
    pub status: WorkflowStatus,
    pub total_steps: usize,
    /// Steps in any terminal status.
    pub completed_steps: usize,
    /// Rounded to two decimals.
    pub progress_percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
}

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

/// The moment a checkpoint was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    WorkflowStart,
    StepStart,
    StepComplete,
}

/// In-memory snapshot of a run's context and step statuses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowCheckpoint {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub kind: CheckpointKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    /// Deep copy of `context` at creation time.
    pub context_snapshot: Context,
    /// Status of every materialized step at creation time.
    pub step_states: HashMap<String, StepStatus>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn step_defaults_apply_when_fields_are_omitted() {
        let step: WorkflowStep = serde_json::from_value(json!({
            "step_id": "summarize",
            "name": "Summarize",
            "agent_type": "text",
        }))
        .unwrap();

        assert_eq!(step.id, "summarize");
        assert_eq!(step.timeout_secs, 300);
        assert_eq!(step.retry_count, 0);
        assert_eq!(step.max_attempts(), 1);
        assert!(step.depends_on.is_empty());
        assert!(step.condition.is_none());
    }

    #[test]
    fn definition_defaults() {
        let def: WorkflowDefinition = serde_json::from_value(json!({
            "name": "digest",
            "steps": [],
        }))
        .unwrap();
        assert_eq!(def.version, "1.0");
        assert_eq!(def.global_timeout_secs, 3600);
        assert_eq!(def.created_by, "system");
    }

    #[test]
    fn status_terminality() {
        assert!(!StepStatus::Pending.is_terminal());
        assert!(!StepStatus::Running.is_terminal());
        assert!(StepStatus::Completed.is_terminal());
        assert!(StepStatus::Failed.is_terminal());
        assert!(StepStatus::Skipped.is_terminal());

        assert!(WorkflowStatus::Cancelled.is_finished());
        assert!(!WorkflowStatus::Running.is_finished());
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(serde_json::to_value(StepStatus::Skipped).unwrap(), json!("skipped"));
        assert_eq!(
            serde_json::to_value(CheckpointKind::WorkflowStart).unwrap(),
            json!("workflow_start")
        );
    }

    #[test]
    fn progress_counts_terminal_steps() {
        let mut exec = WorkflowExecution::new(Uuid::nil(), Context::new());
        for id in ["a", "b", "c"] {
            exec.step_executions.push(StepExecution::new(id, exec.id));
        }
        exec.step_executions[0].status = StepStatus::Completed;
        exec.step_executions[1].status = StepStatus::Running;

        let progress = exec.progress();
        assert_eq!(progress.total_steps, 3);
        assert_eq!(progress.completed_steps, 1);
        assert_eq!(progress.progress_percentage, 33.33);
        assert_eq!(progress.current_step.as_deref(), Some("b"));
    }

    #[test]
    fn progress_of_empty_execution_is_zero() {
        let exec = WorkflowExecution::new(Uuid::nil(), Context::new());
        let progress = exec.progress();
        assert_eq!(progress.total_steps, 0);
        assert_eq!(progress.progress_percentage, 0.0);
        assert!(progress.current_step.is_none());
    }
}
