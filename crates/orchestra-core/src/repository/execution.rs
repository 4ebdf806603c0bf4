//! Execution store trait definition.
//!
//! Defines the storage interface for workflow definitions and execution
//! records. The engine hands the store a full `WorkflowExecution` after every
//! status change; the store is the system of record for finished runs. The
//! infrastructure layer (orchestra-infra) implements this trait in memory.

use orchestra_types::error::RepositoryError;
use orchestra_types::workflow::{WorkflowDefinition, WorkflowExecution, WorkflowStatus};
use uuid::Uuid;

/// Repository trait for definition and execution persistence.
///
/// Covers two entity families:
/// - **Definitions:** immutable templates, upserted by id.
/// - **Executions:** run records, replaced wholesale on every store.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait ExecutionStore: Send + Sync {
    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// Upsert a workflow definition (insert or replace by ID).
    fn store_definition(
        &self,
        def: &WorkflowDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a workflow definition by its UUID.
    fn get_definition(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    /// List all stored definitions.
    fn list_definitions(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowDefinition>, RepositoryError>> + Send;

    /// Delete a workflow definition by ID. Returns `true` if it existed.
    fn delete_definition(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Executions
    // -----------------------------------------------------------------------

    /// Insert or replace an execution record by its id.
    fn store_execution(
        &self,
        execution: &WorkflowExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get an execution record by its UUID.
    fn get_execution(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowExecution>, RepositoryError>> + Send;

    /// List executions, optionally filtered by workflow and status, newest first.
    fn list_executions(
        &self,
        workflow_id: Option<&Uuid>,
        status: Option<WorkflowStatus>,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowExecution>, RepositoryError>> + Send;
}
