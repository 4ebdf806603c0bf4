//! Whole-run scheduling: dependency-driven scan passes over a definition.
//!
//! `WorkflowScheduler::execute` takes a PENDING `WorkflowExecution`, runs it
//! to a terminal status, and returns it. Steps are attempted strictly in
//! definition order within each scan pass; a step is eligible once every id
//! in its `depends_on` has reached any terminal status. Independent ready
//! steps are not run concurrently.
//!
//! Termination:
//! - every step terminal -> COMPLETED
//! - a step FAILED with retries exhausted -> FAILED (`Step <name> failed: ...`)
//! - a pass with no step attempt -> FAILED (circular dependency)
//! - the global timeout elapsing -> FAILED
//!
//! An execution whose step records already match the definition (one
//! restored by a rollback) is continued: COMPLETED and SKIPPED steps stay
//! terminal and the context is not re-seeded.
//!
//! The execution is handed to the `ExecutionStore` after every status change
//! and after every step attempt. Store failures are logged and do not stop
//! the run.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use orchestra_types::workflow::{
    CheckpointKind, StepExecution, StepStatus, WorkflowDefinition, WorkflowExecution,
    WorkflowStatus,
};

use super::checkpoint::CheckpointStore;
use super::invoker::AgentInvoker;
use super::step_executor::StepExecutor;
use crate::repository::execution::ExecutionStore;

/// Error message used when a scan pass makes no progress.
pub const CIRCULAR_DEPENDENCY_MESSAGE: &str = "Circular dependency detected in workflow";

/// Drives one execution at a time through its definition.
pub struct WorkflowScheduler<I: AgentInvoker, S: ExecutionStore> {
    step_executor: StepExecutor<I>,
    store: Arc<S>,
    checkpoints: Arc<CheckpointStore>,
    enforce_global_timeout: bool,
}

impl<I: AgentInvoker, S: ExecutionStore> WorkflowScheduler<I, S> {
    pub fn new(
        step_executor: StepExecutor<I>,
        store: Arc<S>,
        checkpoints: Arc<CheckpointStore>,
    ) -> Self {
        Self {
            step_executor,
            store,
            checkpoints,
            enforce_global_timeout: true,
        }
    }

    /// Whether `global_timeout_secs` of the definition bounds the run.
    pub fn with_global_timeout(mut self, enforce: bool) -> Self {
        self.enforce_global_timeout = enforce;
        self
    }

    /// Run `execution` to a terminal status and return it.
    pub async fn execute(
        &self,
        definition: &WorkflowDefinition,
        mut execution: WorkflowExecution,
    ) -> WorkflowExecution {
        self.run(definition, &mut execution).await;
        execution
    }

    /// Run `execution` in place. If this future is dropped mid-run, the
    /// record keeps whatever state it had reached.
    pub async fn run(&self, definition: &WorkflowDefinition, execution: &mut WorkflowExecution) {
        tracing::info!(
            execution_id = %execution.id,
            workflow_id = %definition.id,
            workflow = %definition.name,
            steps = definition.steps.len(),
            "starting workflow execution"
        );

        let resumed = matches_definition(definition, execution);
        if resumed {
            tracing::info!(
                execution_id = %execution.id,
                completed = execution.progress().completed_steps,
                "resuming from existing step records"
            );
            for record in execution
                .step_executions
                .iter_mut()
                .filter(|s| matches!(s.status, StepStatus::Running | StepStatus::Failed))
            {
                record.status = StepStatus::Pending;
                record.end_time = None;
            }
        } else {
            self.checkpoints
                .create(execution, CheckpointKind::WorkflowStart, None);
        }

        execution.status = WorkflowStatus::Running;
        execution.start_time.get_or_insert_with(Utc::now);
        execution.end_time = None;
        execution.error_message = None;
        if !resumed {
            let execution_id = execution.id;
            execution.step_executions = definition
                .steps
                .iter()
                .map(|step| StepExecution::new(&step.id, execution_id))
                .collect();
            let seed = execution.input_data.clone();
            execution.context.extend(seed);
        }
        self.persist(execution).await;

        let outcome = if self.enforce_global_timeout {
            let limit = Duration::from_secs(definition.global_timeout_secs);
            match tokio::time::timeout(limit, self.drive(definition, execution)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let message = format!(
                        "workflow timed out after {}s",
                        definition.global_timeout_secs
                    );
                    let now = Utc::now();
                    for record in execution
                        .step_executions
                        .iter_mut()
                        .filter(|s| s.status == StepStatus::Running)
                    {
                        record.status = StepStatus::Failed;
                        record.error_message = Some(message.clone());
                        record.end_time = Some(now);
                    }
                    Err(message)
                }
            }
        } else {
            self.drive(definition, execution).await
        };

        match outcome {
            Ok(()) => execution.status = WorkflowStatus::Completed,
            Err(message) => {
                execution.status = WorkflowStatus::Failed;
                execution.error_message = Some(message);
            }
        }
        execution.end_time = Some(Utc::now());
        self.persist(execution).await;

        match execution.status {
            WorkflowStatus::Completed => tracing::info!(
                execution_id = %execution.id,
                status = %execution.status,
                "workflow execution finished"
            ),
            _ => tracing::error!(
                execution_id = %execution.id,
                status = %execution.status,
                error = execution.error_message.as_deref().unwrap_or_default(),
                "workflow execution finished"
            ),
        }
    }

    /// Scan passes until every step is terminal or the run must fail.
    ///
    /// A pass counts as progress when it attempted at least one step, so a
    /// retry (step back to PENDING) is progress too. The number of passes is
    /// bounded by twice the total attempt budget of the definition.
    async fn drive(
        &self,
        definition: &WorkflowDefinition,
        execution: &mut WorkflowExecution,
    ) -> Result<(), String> {
        let total = definition.steps.len();
        let max_passes: usize = 2 * definition
            .steps
            .iter()
            .map(|s| s.max_attempts() as usize)
            .sum::<usize>();
        let mut terminal: HashSet<String> = execution
            .step_executions
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Completed | StepStatus::Skipped))
            .map(|s| s.step_id.clone())
            .collect();

        for pass in 0..max_passes {
            if terminal.len() == total {
                return Ok(());
            }
            tracing::debug!(execution_id = %execution.id, pass, "scan pass");

            let mut attempted = false;
            for step in &definition.steps {
                if terminal.contains(&step.id) {
                    continue;
                }
                if !step.depends_on.iter().all(|dep| terminal.contains(dep)) {
                    continue;
                }
                if execution.step_execution(&step.id).map(|s| s.status) != Some(StepStatus::Pending)
                {
                    continue;
                }

                let status = self.step_executor.run(step, execution).await;
                attempted = true;
                self.persist(execution).await;

                if status.is_terminal() {
                    terminal.insert(step.id.clone());
                }
                if status == StepStatus::Failed {
                    let error = execution
                        .step_execution(&step.id)
                        .and_then(|s| s.error_message.clone())
                        .unwrap_or_default();
                    return Err(format!("Step {} failed: {}", step.name, error));
                }
            }

            if !attempted && terminal.len() < total {
                tracing::error!(
                    execution_id = %execution.id,
                    pending = total - terminal.len(),
                    "no step could run, workflow appears to have circular dependencies"
                );
                return Err(CIRCULAR_DEPENDENCY_MESSAGE.to_string());
            }
        }

        if terminal.len() == total {
            Ok(())
        } else {
            Err(format!(
                "workflow did not finish within {max_passes} scan passes"
            ))
        }
    }

    async fn persist(&self, execution: &WorkflowExecution) {
        if let Err(e) = self.store.store_execution(execution).await {
            tracing::warn!(
                execution_id = %execution.id,
                error = %e,
                "failed to store execution"
            );
        }
    }
}

/// True when `execution` already carries one record per definition step, in
/// definition order. Such a record (for example one restored from a
/// checkpoint) is continued rather than started over.
fn matches_definition(definition: &WorkflowDefinition, execution: &WorkflowExecution) -> bool {
    !execution.step_executions.is_empty()
        && execution.step_executions.len() == definition.steps.len()
        && execution
            .step_executions
            .iter()
            .zip(&definition.steps)
            .all(|(record, step)| record.step_id == step.id)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
