//! Registry of in-flight executions and the engine's public entry point.
//!
//! `ExecutionController` spawns one tokio task per execution and keeps a
//! `CancellationToken` and a completion channel next to each task's
//! `JoinHandle`. It owns the state shared across executions: the pause set,
//! the checkpoint store, and the rollback handler registry. It is an owned
//! value constructed at service start; nothing here is global.
//!
//! Checkpoint histories outlive their tasks so a finished execution can be
//! rolled back. `forget` releases them.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::{DashMap, DashSet};
use orchestra_types::config::EngineConfig;
use orchestra_types::error::RepositoryError;
use orchestra_types::workflow::{
    StepStatus, WorkflowCheckpoint, WorkflowDefinition, WorkflowExecution, WorkflowStatus,
};
use thiserror::Error;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::checkpoint::CheckpointStore;
use super::expression::ExpressionResolver;
use super::invoker::AgentInvoker;
use super::rollback::{RollbackHandler, RollbackRegistry};
use super::scheduler::WorkflowScheduler;
use super::step_executor::StepExecutor;
use crate::repository::execution::ExecutionStore;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors returned by controller operations.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("concurrency limit reached: {limit} workflows already running")]
    ConcurrencyLimitReached { limit: usize },

    #[error("execution {0} is already running")]
    AlreadyRunning(Uuid),

    /// Rollback or forget was requested while the execution's task is
    /// still live.
    #[error("execution {0} is still running")]
    StillRunning(Uuid),

    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),

    #[error("checkpoint {checkpoint_id} not found for execution {execution_id}")]
    CheckpointNotFound {
        execution_id: Uuid,
        checkpoint_id: Uuid,
    },

    #[error("store error: {0}")]
    Store(#[from] RepositoryError),
}

/// Error message recorded on executions cancelled through the controller.
pub const CANCELLED_MESSAGE: &str = "cancelled";

struct RunningExecution {
    handle: JoinHandle<()>,
    token: CancellationToken,
    /// Set to the final record just before the task exits.
    finished: watch::Receiver<Option<WorkflowExecution>>,
}

/// Holds an execution id in the `starting` set until `start` returns or is
/// dropped.
struct StartReservation<'a> {
    starting: &'a DashSet<Uuid>,
    execution_id: Uuid,
}

impl Drop for StartReservation<'_> {
    fn drop(&mut self) {
        self.starting.remove(&self.execution_id);
    }
}

// ---------------------------------------------------------------------------
// ExecutionController
// ---------------------------------------------------------------------------

pub struct ExecutionController<I, S>
where
    I: AgentInvoker + 'static,
    S: ExecutionStore + 'static,
{
    scheduler: Arc<WorkflowScheduler<I, S>>,
    store: Arc<S>,
    checkpoints: Arc<CheckpointStore>,
    paused: Arc<DashSet<Uuid>>,
    running: DashMap<Uuid, RunningExecution>,
    /// Ids between the start checks and their `running` registration.
    starting: DashSet<Uuid>,
    /// One permit per live task.
    slots: Arc<Semaphore>,
    rollback_handlers: RollbackRegistry,
    max_concurrent: usize,
}

impl<I, S> ExecutionController<I, S>
where
    I: AgentInvoker + 'static,
    S: ExecutionStore + 'static,
{
    /// Wire up the engine from `config`.
    pub fn new(invoker: Arc<I>, store: Arc<S>, config: &EngineConfig) -> Self {
        let checkpoints = Arc::new(CheckpointStore::new(config.max_checkpoints));
        let paused = Arc::new(DashSet::new());

        let step_executor = StepExecutor::new(
            ExpressionResolver::new(config.fallback_policy),
            invoker,
            Arc::clone(&checkpoints),
            Arc::clone(&paused),
        )
        .with_pause_poll_interval(Duration::from_millis(config.pause_poll_interval_ms))
        .with_retry_backoff_base(Duration::from_millis(config.retry_backoff_base_ms))
        .with_default_step_timeout(Duration::from_secs(config.default_step_timeout_secs));

        let scheduler = WorkflowScheduler::new(step_executor, Arc::clone(&store), Arc::clone(&checkpoints))
            .with_global_timeout(config.enforce_global_timeout);

        let max_concurrent = config.max_concurrent_workflows.min(Semaphore::MAX_PERMITS);
        Self {
            scheduler: Arc::new(scheduler),
            store,
            checkpoints,
            paused,
            running: DashMap::new(),
            starting: DashSet::new(),
            slots: Arc::new(Semaphore::new(max_concurrent)),
            rollback_handlers: RollbackRegistry::new(),
            max_concurrent,
        }
    }

    /// Store `execution` and spawn a task that runs it.
    ///
    /// A new execution is stored as PENDING. An execution whose step
    /// records match `definition` (one restored by `rollback`) continues
    /// from them instead of starting over.
    ///
    /// The id and a concurrency slot are reserved before anything is
    /// awaited, so concurrent calls cannot oversubscribe the limit or start
    /// the same id twice.
    pub async fn start(
        &self,
        definition: WorkflowDefinition,
        execution: WorkflowExecution,
    ) -> Result<Uuid, ControllerError> {
        let execution_id = execution.id;
        if !self.starting.insert(execution_id) {
            return Err(ControllerError::AlreadyRunning(execution_id));
        }
        let _reservation = StartReservation {
            starting: &self.starting,
            execution_id,
        };
        if self.is_live(&execution_id) {
            return Err(ControllerError::AlreadyRunning(execution_id));
        }
        let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
            tracing::warn!(
                execution_id = %execution_id,
                limit = self.max_concurrent,
                "refusing to start workflow, concurrency limit reached"
            );
            return Err(ControllerError::ConcurrencyLimitReached {
                limit: self.max_concurrent,
            });
        };

        if let Err(e) = self.store.store_execution(&execution).await {
            tracing::warn!(execution_id = %execution_id, error = %e, "failed to store new execution");
        }

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let (done, finished) = watch::channel(None);
        let scheduler = Arc::clone(&self.scheduler);
        let store = Arc::clone(&self.store);
        let paused = Arc::clone(&self.paused);

        let handle = tokio::spawn(async move {
            let _permit = permit;
            let mut execution = execution;
            let was_cancelled = tokio::select! {
                _ = cancelled.cancelled() => true,
                _ = scheduler.run(&definition, &mut execution) => false,
            };

            if was_cancelled {
                execution.status = WorkflowStatus::Cancelled;
                execution.end_time = Some(Utc::now());
                execution.error_message = Some(CANCELLED_MESSAGE.to_string());
                if let Err(e) = store.store_execution(&execution).await {
                    tracing::warn!(
                        execution_id = %execution.id,
                        error = %e,
                        "failed to store cancelled execution"
                    );
                }
                tracing::info!(execution_id = %execution.id, "workflow execution cancelled");
            }
            paused.remove(&execution.id);
            done.send_replace(Some(execution));
        });

        self.running.insert(
            execution_id,
            RunningExecution {
                handle,
                token,
                finished,
            },
        );
        tracing::info!(execution_id = %execution_id, "workflow execution started");
        Ok(execution_id)
    }

    /// Load a stored execution and `start` it again, continuing from its
    /// recorded step states. Used after `rollback`.
    pub async fn restart(
        &self,
        definition: WorkflowDefinition,
        execution_id: &Uuid,
    ) -> Result<Uuid, ControllerError> {
        let execution = self
            .store
            .get_execution(execution_id)
            .await?
            .ok_or(ControllerError::ExecutionNotFound(*execution_id))?;
        self.start(definition, execution).await
    }

    /// Cancel a registered execution and wait for its task to record the
    /// cancellation. Returns `false` if no task was registered.
    ///
    /// Best effort: an in-flight agent call is abandoned, not rolled back.
    pub async fn cancel(&self, execution_id: &Uuid) -> bool {
        let Some((_, running)) = self.running.remove(execution_id) else {
            return false;
        };
        running.token.cancel();
        if let Err(e) = running.handle.await {
            tracing::warn!(execution_id = %execution_id, error = %e, "execution task ended abnormally");
        }
        self.paused.remove(execution_id);
        tracing::info!(execution_id = %execution_id, "cancelled workflow execution");
        true
    }

    /// Cancel every registered execution.
    pub async fn shutdown(&self) {
        let ids: Vec<Uuid> = self.running.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.cancel(&id).await;
        }
    }

    /// Hold a running execution before its next step. Returns `false` if
    /// the execution has no live task.
    pub fn pause(&self, execution_id: &Uuid) -> bool {
        if !self.is_live(execution_id) {
            return false;
        }
        self.paused.insert(*execution_id);
        tracing::info!(execution_id = %execution_id, "paused workflow execution");
        true
    }

    /// Release a paused execution. Returns `false` if it was not paused.
    pub fn resume(&self, execution_id: &Uuid) -> bool {
        if self.paused.remove(execution_id).is_none() {
            return false;
        }
        tracing::info!(execution_id = %execution_id, "resumed workflow execution");
        true
    }

    pub fn is_paused(&self, execution_id: &Uuid) -> bool {
        self.paused.contains(execution_id)
    }

    /// Ids of executions whose tasks are still live.
    pub fn list_running(&self) -> Vec<Uuid> {
        self.running
            .iter()
            .filter(|e| !e.handle.is_finished())
            .map(|e| *e.key())
            .collect()
    }

    /// Deregister tasks that have finished. Returns how many were removed.
    ///
    /// Checkpoint histories are kept; see `forget`.
    pub fn cleanup(&self) -> usize {
        let before = self.running.len();
        self.running.retain(|_, r| !r.handle.is_finished());
        let removed = before.saturating_sub(self.running.len());
        if removed > 0 {
            tracing::info!(removed, "cleaned up completed executions");
        }
        removed
    }

    /// Await an execution's final record and deregister it.
    ///
    /// The execution stays registered while waiting, so other callers can
    /// still pause, cancel, or list it. Returns `None` if nothing was
    /// registered under `execution_id`. If the task panicked, the last
    /// stored record is returned instead. Dropping the returned future
    /// leaves the execution running.
    pub async fn wait(&self, execution_id: &Uuid) -> Option<WorkflowExecution> {
        let mut finished = self.running.get(execution_id)?.finished.clone();
        let outcome = finished
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|record| (*record).clone());
        self.running
            .remove_if(execution_id, |_, r| r.finished.same_channel(&finished));

        match outcome {
            Some(execution) => Some(execution),
            None => {
                tracing::error!(
                    execution_id = %execution_id,
                    "execution task ended without a final record"
                );
                self.store.get_execution(execution_id).await.ok().flatten()
            }
        }
    }

    /// Retained checkpoints for an execution, oldest first.
    pub fn list_checkpoints(&self, execution_id: &Uuid) -> Vec<WorkflowCheckpoint> {
        self.checkpoints.list(execution_id)
    }

    /// Drop everything the controller retains for a finished execution:
    /// its registration, pause flag, and checkpoint history. Returns how
    /// many checkpoints were released. After this the execution can no
    /// longer be rolled back.
    pub fn forget(&self, execution_id: &Uuid) -> Result<usize, ControllerError> {
        if self.is_live(execution_id) || self.starting.contains(execution_id) {
            return Err(ControllerError::StillRunning(*execution_id));
        }
        self.running.remove(execution_id);
        self.paused.remove(execution_id);
        let released = self.checkpoints.remove(execution_id);
        tracing::debug!(execution_id = %execution_id, released, "forgot workflow execution");
        Ok(released)
    }

    /// Register the compensating action run when `step_id` is rolled back
    /// out of COMPLETED.
    pub fn register_rollback_handler(
        &self,
        step_id: impl Into<String>,
        handler: impl RollbackHandler + 'static,
    ) {
        self.rollback_handlers.register(step_id, handler);
    }

    /// Returns `true` if a handler was registered for `step_id`.
    pub fn unregister_rollback_handler(&self, step_id: &str) -> bool {
        self.rollback_handlers.unregister(step_id)
    }

    /// Restore an execution to a checkpoint.
    ///
    /// Replaces `context` with the snapshot and sets every step named in the
    /// snapshot back to its recorded status. Steps leaving COMPLETED have
    /// their rollback handler run; steps returning to PENDING lose their
    /// timestamps, output, and error. The workflow is marked RUNNING and
    /// stored; `restart` continues it from the restored step states.
    pub async fn rollback(
        &self,
        execution_id: &Uuid,
        checkpoint_id: &Uuid,
    ) -> Result<WorkflowExecution, ControllerError> {
        if self.is_live(execution_id) {
            return Err(ControllerError::StillRunning(*execution_id));
        }

        let checkpoint = self
            .checkpoints
            .get(execution_id, checkpoint_id)
            .ok_or(ControllerError::CheckpointNotFound {
                execution_id: *execution_id,
                checkpoint_id: *checkpoint_id,
            })?;
        let mut execution = self
            .store
            .get_execution(execution_id)
            .await?
            .ok_or(ControllerError::ExecutionNotFound(*execution_id))?;

        execution.context = checkpoint.context_snapshot.clone();

        for record in &mut execution.step_executions {
            let Some(&target) = checkpoint.step_states.get(&record.step_id) else {
                continue;
            };
            if record.status == StepStatus::Completed && target != StepStatus::Completed {
                self.rollback_handlers.run(record).await;
            }
            if target == StepStatus::Pending {
                record.start_time = None;
                record.end_time = None;
                record.output_data = None;
                record.error_message = None;
            }
            record.status = target;
        }

        execution.status = WorkflowStatus::Running;
        execution.end_time = None;
        execution.error_message = None;
        self.store.store_execution(&execution).await?;

        tracing::info!(
            execution_id = %execution_id,
            checkpoint_id = %checkpoint_id,
            kind = ?checkpoint.kind,
            "rolled back workflow execution"
        );
        Ok(execution)
    }

    /// Run `cleanup` every `interval` until `shutdown` is cancelled.
    pub fn spawn_cleanup_loop(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        controller.cleanup();
                    }
                }
            }
            tracing::debug!("cleanup loop stopped");
        })
    }

    fn is_live(&self, execution_id: &Uuid) -> bool {
        self.running
            .get(execution_id)
            .is_some_and(|r| !r.handle.is_finished())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
