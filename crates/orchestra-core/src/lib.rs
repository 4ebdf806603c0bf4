//! Workflow engine logic and port traits for orchestra.
//!
//! This crate defines the ports (`AgentInvoker`, `ExecutionStore`) that the
//! infrastructure layer implements. It depends only on `orchestra-types`,
//! never on `orchestra-infra` or any network crate.

pub mod repository;
pub mod workflow;
