//! Agent invocation port.
//!
//! The infrastructure layer (orchestra-infra) implements this trait over
//! HTTP. Implementations never fail: transport errors, timeouts, and non-2xx
//! responses come back as an `AgentResponse` with `success = false`.

use std::time::Duration;

use orchestra_types::agent::AgentResponse;
use orchestra_types::workflow::Context;

/// Sends a step's resolved input to an external agent and normalizes the result.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait AgentInvoker: Send + Sync {
    /// Invoke an agent of `agent_type` with `input_data`.
    ///
    /// `timeout` is the step timeout. Implementations add their own margin
    /// on top for the transport deadline.
    fn invoke(
        &self,
        agent_type: &str,
        input_data: &Context,
        timeout: Duration,
    ) -> impl std::future::Future<Output = AgentResponse> + Send;
}
