//! Infrastructure layer for orchestra.
//!
//! Contains implementations of the ports defined in `orchestra-core`: the
//! HTTP agent invoker and the in-memory execution store, plus the TOML
//! configuration loader.

pub mod agent;
pub mod config;
pub mod memory;
