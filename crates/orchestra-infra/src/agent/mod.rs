//! Agent service adapters.

pub mod http;

pub use http::HttpAgentInvoker;
