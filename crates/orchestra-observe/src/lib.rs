//! Logging bootstrap for orchestra binaries.

pub mod tracing_setup;
