//! Wire types for the external agent executor.
//!
//! The engine sends `AgentRequest` and receives `AgentResponse`. Transport
//! failures are folded into an `AgentResponse` with `success = false` so
//! callers never see a raised error from an invocation.

use serde::{Deserialize, Serialize};

use crate::workflow::Context;

/// Request body sent to the agent executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub agent_type: String,
    pub input_data: Context,
    /// Step timeout in seconds, forwarded so the agent can self-limit.
    pub timeout: u64,
}

/// Normalized result of one agent invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_data: Option<Context>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

impl AgentResponse {
    /// Successful response carrying `output_data`.
    pub fn success(output_data: Context, agent_id: Option<String>) -> Self {
        Self {
            success: true,
            output_data: Some(output_data),
            error_message: None,
            agent_id,
        }
    }

    /// Failed response with a descriptive message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output_data: None,
            error_message: Some(message.into()),
            agent_id: None,
        }
    }
}
