//! Shared domain types for orchestra.
//!
//! This crate contains the data model used across the workflow engine:
//! definitions, executions, checkpoints, agent wire types, configuration, and
//! the repository error type.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod agent;
pub mod config;
pub mod error;
pub mod workflow;
