//! In-memory checkpoint history for rollback.
//!
//! `CheckpointStore` keeps a bounded, per-execution list of snapshots of
//! `context` and step statuses. When the list grows past its bound, the
//! oldest entries are evicted first. Nothing here survives a process restart;
//! the execution store remains the system of record.

use std::collections::VecDeque;

use chrono::Utc;
use dashmap::DashMap;
use orchestra_types::workflow::{CheckpointKind, WorkflowCheckpoint, WorkflowExecution};
use uuid::Uuid;

/// Default number of checkpoints retained per execution.
pub const DEFAULT_MAX_CHECKPOINTS: usize = 10;

/// Shared across executions; each execution only touches its own list.
#[derive(Debug)]
pub struct CheckpointStore {
    checkpoints: DashMap<Uuid, VecDeque<WorkflowCheckpoint>>,
    max_per_execution: usize,
}

impl CheckpointStore {
    /// Create a store retaining at most `max_per_execution` checkpoints per
    /// execution (at least one).
    pub fn new(max_per_execution: usize) -> Self {
        Self {
            checkpoints: DashMap::new(),
            max_per_execution: max_per_execution.max(1),
        }
    }

    /// Snapshot `execution` and append it to its history.
    pub fn create(
        &self,
        execution: &WorkflowExecution,
        kind: CheckpointKind,
        step_id: Option<&str>,
    ) -> Uuid {
        let checkpoint = WorkflowCheckpoint {
            id: Uuid::now_v7(),
            execution_id: execution.id,
            kind,
            step_id: step_id.map(str::to_string),
            context_snapshot: execution.context.clone(),
            step_states: execution.step_states(),
            created_at: Utc::now(),
        };
        let id = checkpoint.id;

        let mut history = self.checkpoints.entry(execution.id).or_default();
        history.push_back(checkpoint);
        while history.len() > self.max_per_execution {
            history.pop_front();
        }

        tracing::debug!(
            execution_id = %execution.id,
            checkpoint_id = %id,
            ?kind,
            step_id,
            "checkpoint created"
        );
        id
    }

    /// All retained checkpoints for an execution, oldest first.
    pub fn list(&self, execution_id: &Uuid) -> Vec<WorkflowCheckpoint> {
        self.checkpoints
            .get(execution_id)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, execution_id: &Uuid, checkpoint_id: &Uuid) -> Option<WorkflowCheckpoint> {
        self.checkpoints
            .get(execution_id)?
            .iter()
            .find(|c| c.id == *checkpoint_id)
            .cloned()
    }

    /// Drop the whole history of an execution. Returns how many were removed.
    pub fn remove(&self, execution_id: &Uuid) -> usize {
        self.checkpoints
            .remove(execution_id)
            .map(|(_, history)| history.len())
            .unwrap_or(0)
    }
}

impl Default for CheckpointStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHECKPOINTS)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
