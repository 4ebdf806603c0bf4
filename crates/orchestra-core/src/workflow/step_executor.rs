//! Single-step execution: pause wait, condition, input mapping, agent call,
//! output mapping, retry backoff, and checkpoints.
//!
//! `StepExecutor::run` performs exactly one attempt of one step and leaves
//! the step's `StepExecution` in one of:
//! - `Completed` / `Skipped` -- terminal;
//! - `Failed` -- terminal, retries exhausted;
//! - `Pending` -- the attempt failed, a retry was consumed, and the backoff
//!   sleep has already elapsed. The scheduler picks it up on a later pass.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashSet;
use orchestra_types::agent::AgentResponse;
use orchestra_types::workflow::{CheckpointKind, StepStatus, WorkflowExecution, WorkflowStep};
use uuid::Uuid;

use super::checkpoint::CheckpointStore;
use super::expression::{ExpressionResolver, set_nested_value};
use super::invoker::AgentInvoker;

/// Default interval at which a paused step re-checks the pause set.
pub const DEFAULT_PAUSE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default base of the exponential retry backoff.
pub const DEFAULT_RETRY_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Timeout applied to steps that declare `timeout_secs = 0`.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(300);

/// Runs one attempt of one step against an `AgentInvoker`.
pub struct StepExecutor<I: AgentInvoker> {
    resolver: ExpressionResolver,
    invoker: Arc<I>,
    checkpoints: Arc<CheckpointStore>,
    paused: Arc<DashSet<Uuid>>,
    pause_poll_interval: Duration,
    retry_backoff_base: Duration,
    default_step_timeout: Duration,
}

impl<I: AgentInvoker> StepExecutor<I> {
    pub fn new(
        resolver: ExpressionResolver,
        invoker: Arc<I>,
        checkpoints: Arc<CheckpointStore>,
        paused: Arc<DashSet<Uuid>>,
    ) -> Self {
        Self {
            resolver,
            invoker,
            checkpoints,
            paused,
            pause_poll_interval: DEFAULT_PAUSE_POLL_INTERVAL,
            retry_backoff_base: DEFAULT_RETRY_BACKOFF_BASE,
            default_step_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }

    pub fn with_pause_poll_interval(mut self, interval: Duration) -> Self {
        self.pause_poll_interval = interval;
        self
    }

    pub fn with_retry_backoff_base(mut self, base: Duration) -> Self {
        self.retry_backoff_base = base;
        self
    }

    pub fn with_default_step_timeout(mut self, timeout: Duration) -> Self {
        self.default_step_timeout = timeout;
        self
    }

    /// Agent-call timeout for `step`.
    pub fn step_timeout(&self, step: &WorkflowStep) -> Duration {
        match step.timeout_secs {
            0 => self.default_step_timeout,
            secs => Duration::from_secs(secs),
        }
    }

    /// Backoff before the retry numbered `retry_attempt` (1-based):
    /// `base * 2^retry_attempt`, saturating.
    pub fn retry_delay(&self, retry_attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_attempt).unwrap_or(u32::MAX);
        self.retry_backoff_base.saturating_mul(factor)
    }

    /// Execute one attempt of `step` within `execution` and return the
    /// step's resulting status.
    pub async fn run(&self, step: &WorkflowStep, execution: &mut WorkflowExecution) -> StepStatus {
        let execution_id = execution.id;
        let Some(idx) = execution
            .step_executions
            .iter()
            .position(|s| s.step_id == step.id)
        else {
            tracing::error!(
                execution_id = %execution_id,
                step_id = %step.id,
                "step has no execution record"
            );
            return StepStatus::Failed;
        };

        self.wait_while_paused(execution_id).await;

        self.checkpoints
            .create(execution, CheckpointKind::StepStart, Some(&step.id));

        {
            let record = &mut execution.step_executions[idx];
            record.status = StepStatus::Running;
            record.start_time = Some(Utc::now());
            record.end_time = None;
        }
        tracing::info!(
            execution_id = %execution_id,
            step_id = %step.id,
            agent_type = %step.agent_type,
            attempt = execution.step_executions[idx].retry_attempt + 1,
            "executing step"
        );

        if let Some(condition) = &step.condition {
            if !self.resolver.evaluate_condition(condition, &execution.context) {
                let record = &mut execution.step_executions[idx];
                record.status = StepStatus::Skipped;
                record.end_time = Some(Utc::now());
                tracing::info!(
                    execution_id = %execution_id,
                    step_id = %step.id,
                    condition = %condition,
                    "condition not met, skipping step"
                );
                return StepStatus::Skipped;
            }
        }

        let response = match self
            .resolver
            .resolve_input(&step.input_mapping, &execution.context)
        {
            Ok(input) => {
                let input = execution.step_executions[idx].input_data.insert(input);
                self.invoker
                    .invoke(&step.agent_type, input, self.step_timeout(step))
                    .await
            }
            Err(e) => AgentResponse::failure(format!("input mapping failed: {e}")),
        };

        if response.success {
            let output = response.output_data.unwrap_or_default();
            for (output_key, context_path) in &step.output_mapping {
                match output.get(output_key) {
                    Some(value) => {
                        set_nested_value(&mut execution.context, context_path, value.clone())
                    }
                    None => tracing::warn!(
                        execution_id = %execution_id,
                        step_id = %step.id,
                        output_key = %output_key,
                        context_path = %context_path,
                        "step output key not found"
                    ),
                }
            }

            let record = &mut execution.step_executions[idx];
            record.status = StepStatus::Completed;
            record.output_data = Some(output);
            record.agent_id = response.agent_id;
            record.error_message = None;
            record.end_time = Some(Utc::now());

            self.checkpoints
                .create(execution, CheckpointKind::StepComplete, Some(&step.id));
            tracing::info!(execution_id = %execution_id, step_id = %step.id, "step completed");
            return StepStatus::Completed;
        }

        let message = response
            .error_message
            .unwrap_or_else(|| "agent reported failure without a message".to_string());
        let record = &mut execution.step_executions[idx];
        record.status = StepStatus::Failed;
        record.error_message = Some(message);
        record.end_time = Some(Utc::now());

        if record.retry_attempt < step.retry_count {
            record.retry_attempt += 1;
            record.status = StepStatus::Pending;
            let delay = self.retry_delay(record.retry_attempt);
            tracing::warn!(
                execution_id = %execution_id,
                step_id = %step.id,
                retry_attempt = record.retry_attempt,
                retry_count = step.retry_count,
                delay_ms = delay.as_millis() as u64,
                error = record.error_message.as_deref().unwrap_or_default(),
                "step failed, retrying after backoff"
            );
            tokio::time::sleep(delay).await;
            return StepStatus::Pending;
        }

        tracing::error!(
            execution_id = %execution_id,
            step_id = %step.id,
            error = record.error_message.as_deref().unwrap_or_default(),
            "step failed, retries exhausted"
        );
        StepStatus::Failed
    }

    async fn wait_while_paused(&self, execution_id: Uuid) {
        if !self.paused.contains(&execution_id) {
            return;
        }
        tracing::info!(execution_id = %execution_id, "execution paused, waiting");
        while self.paused.contains(&execution_id) {
            tokio::time::sleep(self.pause_poll_interval).await;
        }
        tracing::info!(execution_id = %execution_id, "execution resumed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use orchestra_types::config::FallbackPolicy;
    use orchestra_types::workflow::StepExecution;
    use serde_json::json;

    use crate::workflow::testing::{ScriptedInvoker, object, ok, step};

    fn execution_for(steps: &[&WorkflowStep], context: serde_json::Value) -> WorkflowExecution {
        let mut exec = WorkflowExecution::new(Uuid::now_v7(), object(json!({})));
        exec.context = object(context);
        for s in steps {
            exec.step_executions.push(StepExecution::new(&s.id, exec.id));
        }
        exec
    }

    fn executor(
        invoker: Arc<ScriptedInvoker>,
        policy: FallbackPolicy,
    ) -> (StepExecutor<ScriptedInvoker>, Arc<CheckpointStore>, Arc<DashSet<Uuid>>) {
        let checkpoints = Arc::new(CheckpointStore::default());
        let paused = Arc::new(DashSet::new());
        let exec = StepExecutor::new(
            ExpressionResolver::new(policy),
            invoker,
            Arc::clone(&checkpoints),
            Arc::clone(&paused),
        )
        .with_pause_poll_interval(Duration::from_millis(5))
        .with_retry_backoff_base(Duration::from_millis(1));
        (exec, checkpoints, paused)
    }

    #[tokio::test]
    async fn success_maps_input_and_output() {
        let invoker = Arc::new(ScriptedInvoker::new().script(
            "summarize",
            vec![ok(json!({ "summary": "short", "score": 0.9 }))],
        ));
        let (executor, checkpoints, _) = executor(Arc::clone(&invoker), FallbackPolicy::Lenient);

        let mut s = step("summarize");
        s.input_mapping.insert("text".into(), "doc.body".into());
        s.input_mapping.insert("limit".into(), "10".into());
        s.output_mapping.insert("summary".into(), "results.summary".into());
        s.output_mapping.insert("missing".into(), "results.none".into());
        let mut exec = execution_for(&[&s], json!({ "doc": { "body": "long text" } }));

        let status = executor.run(&s, &mut exec).await;

        assert_eq!(status, StepStatus::Completed);
        let record = exec.step_execution("summarize").unwrap();
        assert_eq!(record.agent_id.as_deref(), Some("agent-1"));
        let input = record.input_data.as_ref().unwrap();
        assert_eq!(input.get("text"), Some(&json!("long text")));
        assert_eq!(input.get("limit"), Some(&json!(10)));
        assert!(record.start_time.is_some() && record.end_time.is_some());
        assert_eq!(exec.context.get("results"), Some(&json!({ "summary": "short" })));

        let kinds: Vec<CheckpointKind> = checkpoints.list(&exec.id).iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![CheckpointKind::StepStart, CheckpointKind::StepComplete]);
        assert_eq!(invoker.call_count(), 1);
    }

    #[tokio::test]
    async fn false_condition_skips_without_invoking() {
        let invoker = Arc::new(ScriptedInvoker::new());
        let (executor, _, _) = executor(Arc::clone(&invoker), FallbackPolicy::Lenient);

        let mut s = step("gate");
        s.condition = Some("${flag} == true".into());
        s.input_mapping.insert("x".into(), "flag".into());
        let mut exec = execution_for(&[&s], json!({ "flag": false }));

        assert_eq!(executor.run(&s, &mut exec).await, StepStatus::Skipped);
        let record = exec.step_execution("gate").unwrap();
        assert_eq!(record.status, StepStatus::Skipped);
        assert!(record.input_data.is_none());
        assert!(record.end_time.is_some());
        assert_eq!(invoker.call_count(), 0);
    }

    #[tokio::test]
    async fn failure_consumes_retry_then_exhausts() {
        let invoker = Arc::new(
            ScriptedInvoker::new().script("flaky", vec![AgentResponse::failure("boom")]),
        );
        let (executor, _, _) = executor(Arc::clone(&invoker), FallbackPolicy::Lenient);

        let mut s = step("flaky");
        s.retry_count = 1;
        let mut exec = execution_for(&[&s], json!({}));

        assert_eq!(executor.run(&s, &mut exec).await, StepStatus::Pending);
        let record = exec.step_execution("flaky").unwrap();
        assert_eq!(record.retry_attempt, 1);
        assert_eq!(record.error_message.as_deref(), Some("boom"));

        assert_eq!(executor.run(&s, &mut exec).await, StepStatus::Failed);
        let record = exec.step_execution("flaky").unwrap();
        assert_eq!(record.retry_attempt, 1);
        assert_eq!(record.status, StepStatus::Failed);
        assert_eq!(invoker.call_count(), 2);
    }

    #[tokio::test]
    async fn success_after_retry_clears_error() {
        let invoker = Arc::new(ScriptedInvoker::new().script(
            "s",
            vec![AgentResponse::failure("transient"), ok(json!({ "v": 1 }))],
        ));
        let (executor, _, _) = executor(invoker, FallbackPolicy::Lenient);
        let mut s = step("s");
        s.retry_count = 3;
        let mut exec = execution_for(&[&s], json!({}));

        assert_eq!(executor.run(&s, &mut exec).await, StepStatus::Pending);
        assert_eq!(executor.run(&s, &mut exec).await, StepStatus::Completed);
        let record = exec.step_execution("s").unwrap();
        assert_eq!(record.retry_attempt, 1);
        assert!(record.error_message.is_none());
    }

    #[tokio::test]
    async fn strict_mapping_failure_fails_the_attempt() {
        let invoker = Arc::new(ScriptedInvoker::new());
        let (executor, _, _) = executor(Arc::clone(&invoker), FallbackPolicy::Strict);

        let mut s = step("strict");
        s.input_mapping.insert("x".into(), "nowhere".into());
        let mut exec = execution_for(&[&s], json!({}));

        assert_eq!(executor.run(&s, &mut exec).await, StepStatus::Failed);
        let message = exec.step_execution("strict").unwrap().error_message.clone();
        assert_eq!(
            message.as_deref(),
            Some("input mapping failed: context key 'nowhere' not found")
        );
        assert_eq!(invoker.call_count(), 0);
    }

    #[tokio::test]
    async fn paused_execution_waits_for_resume() {
        let invoker = Arc::new(ScriptedInvoker::new());
        let (executor, _, paused) = executor(Arc::clone(&invoker), FallbackPolicy::Lenient);
        let s = step("p");
        let mut exec = execution_for(&[&s], json!({}));
        paused.insert(exec.id);

        let resume = {
            let paused = Arc::clone(&paused);
            let id = exec.id;
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                assert_eq!(invoker.call_count(), 0);
                paused.remove(&id);
            })
        };

        assert_eq!(executor.run(&s, &mut exec).await, StepStatus::Completed);
        resume.await.unwrap();
    }

    #[tokio::test]
    async fn resolved_input_is_recorded_before_the_agent_returns() {
        let invoker = Arc::new(ScriptedInvoker::new().with_delay(Duration::from_secs(30)));
        let (executor, _, _) = executor(Arc::clone(&invoker), FallbackPolicy::Lenient);
        let mut s = step("slow");
        s.input_mapping.insert("order".into(), "order.id".into());
        let mut exec = execution_for(&[&s], json!({ "order": { "id": 7 } }));

        let abandoned =
            tokio::time::timeout(Duration::from_millis(20), executor.run(&s, &mut exec)).await;

        assert!(abandoned.is_err());
        assert_eq!(invoker.call_count(), 1);
        let record = exec.step_execution("slow").unwrap();
        assert_eq!(record.status, StepStatus::Running);
        assert_eq!(record.input_data, Some(object(json!({ "order": 7 }))));
    }

    #[test]
    fn retry_delay_doubles_and_saturates() {
        let (executor, _, _) = executor(Arc::new(ScriptedInvoker::new()), FallbackPolicy::Lenient);
        let executor = executor.with_retry_backoff_base(Duration::from_secs(1));
        assert_eq!(executor.retry_delay(1), Duration::from_secs(2));
        assert_eq!(executor.retry_delay(3), Duration::from_secs(8));
        assert!(executor.retry_delay(200) >= Duration::from_secs(u32::MAX as u64));
    }

    #[test]
    fn zero_step_timeout_uses_engine_default() {
        let (executor, _, _) = executor(Arc::new(ScriptedInvoker::new()), FallbackPolicy::Lenient);
        let executor = executor.with_default_step_timeout(Duration::from_secs(42));
        let mut s = step("a");
        assert_eq!(executor.step_timeout(&s), Duration::from_secs(5));
        s.timeout_secs = 0;
        assert_eq!(executor.step_timeout(&s), Duration::from_secs(42));
    }
}
