//! Workflow engine: expression resolution, step execution, scheduling, and
//! execution control.
//!
//! - `expression` / `condition` -- input mapping and condition evaluation
//! - `invoker` -- the agent-call port
//! - `checkpoint` -- bounded in-memory checkpoint history
//! - `step_executor` -- one attempt of one step
//! - `scheduler` -- dependency-ordered scan loop over a whole execution
//! - `controller` -- task registry, pause/resume/cancel, rollback
//! - `rollback` -- per-step compensating handlers
//! - `definition` -- YAML/JSON loading and authoring lint

pub mod checkpoint;
pub mod condition;
pub mod controller;
pub mod definition;
pub mod expression;
pub mod invoker;
pub mod rollback;
pub mod scheduler;
pub mod step_executor;

#[cfg(test)]
pub(crate) mod testing;
