//! Per-step rollback callbacks.
//!
//! When a rollback moves a step out of COMPLETED, the controller calls the
//! handler registered for that step id. Handlers are plain async closures or
//! `RollbackHandler` impls; their errors are logged and never abort the
//! rollback.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use orchestra_types::workflow::StepExecution;

/// Compensating action for a completed step.
///
/// Uses a boxed future so handlers can be stored as trait objects.
pub trait RollbackHandler: Send + Sync {
    fn rollback<'a>(
        &'a self,
        step: &'a StepExecution,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;
}

impl<F, Fut> RollbackHandler for F
where
    F: Fn(StepExecution) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn rollback<'a>(
        &'a self,
        step: &'a StepExecution,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(self(step.clone()))
    }
}

/// Registry of rollback handlers keyed by step id.
#[derive(Default)]
pub struct RollbackRegistry {
    handlers: DashMap<String, Arc<dyn RollbackHandler>>,
}

impl RollbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `step_id`.
    pub fn register(&self, step_id: impl Into<String>, handler: impl RollbackHandler + 'static) {
        self.handlers.insert(step_id.into(), Arc::new(handler));
    }

    /// Returns `true` if a handler was registered.
    pub fn unregister(&self, step_id: &str) -> bool {
        self.handlers.remove(step_id).is_some()
    }

    /// Run the handler for `step`, if any.
    pub async fn run(&self, step: &StepExecution) {
        // Clone out of the map so no shard lock is held across the await.
        let handler = self.handlers.get(&step.step_id).map(|h| Arc::clone(h.value()));
        let Some(handler) = handler else {
            tracing::info!(
                execution_id = %step.execution_id,
                step_id = %step.step_id,
                "no rollback handler registered, nothing to undo"
            );
            return;
        };

        match handler.rollback(step).await {
            Ok(()) => tracing::info!(
                execution_id = %step.execution_id,
                step_id = %step.step_id,
                "step rolled back"
            ),
            Err(e) => tracing::warn!(
                execution_id = %step.execution_id,
                step_id = %step.step_id,
                error = %e,
                "rollback handler failed"
            ),
        }
    }
}

impl std::fmt::Debug for RollbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollbackRegistry")
            .field("steps", &self.handlers.iter().map(|e| e.key().clone()).collect::<Vec<_>>())
            .finish()
    }
}
