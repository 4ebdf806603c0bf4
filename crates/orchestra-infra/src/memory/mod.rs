//! In-process store adapters.

pub mod execution_store;

pub use execution_store::InMemoryExecutionStore;
