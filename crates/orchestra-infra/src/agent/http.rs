//! HttpAgentInvoker -- concrete [`AgentInvoker`] over the agent service's
//! HTTP API.
//!
//! POSTs `{agent_type, input_data, timeout}` to `{url}{execute_path}` and
//! parses the body as an `AgentResponse`. Every failure mode (deadline,
//! non-2xx, transport, undecodable body) is folded into a failed response.

use std::time::Duration;

use orchestra_core::workflow::invoker::AgentInvoker;
use orchestra_types::agent::{AgentRequest, AgentResponse};
use orchestra_types::config::AgentServiceConfig;
use orchestra_types::workflow::Context;

pub struct HttpAgentInvoker {
    client: reqwest::Client,
    base_url: String,
    execute_path: String,
    health_path: String,
    timeout_margin: Duration,
}

impl HttpAgentInvoker {
    pub fn new(config: &AgentServiceConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("orchestra/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            execute_path: config.execute_path.clone(),
            health_path: config.health_path.clone(),
            timeout_margin: Duration::from_secs(config.timeout_margin_secs),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the full API URL for a given path.
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET the health endpoint. `Ok(false)` means the service answered with a
    /// non-2xx status; `Err` means it could not be reached.
    pub async fn health(&self) -> Result<bool, reqwest::Error> {
        let response = self
            .client
            .get(self.url(&self.health_path))
            .timeout(self.timeout_margin.max(Duration::from_secs(1)))
            .send()
            .await?;
        Ok(response.status().is_success())
    }
}

impl AgentInvoker for HttpAgentInvoker {
    async fn invoke(&self, agent_type: &str, input_data: &Context, timeout: Duration) -> AgentResponse {
        let body = AgentRequest {
            agent_type: agent_type.to_string(),
            input_data: input_data.clone(),
            timeout: timeout.as_secs(),
        };

        let result = self
            .client
            .post(self.url(&self.execute_path))
            .timeout(timeout + self.timeout_margin)
            .json(&body)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                tracing::warn!(agent_type, "agent call timed out");
                return AgentResponse::failure("Agent call timed out");
            }
            Err(e) => {
                tracing::warn!(agent_type, error = %e, "agent call failed");
                return AgentResponse::failure(format!("Agent call failed: {e}"));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            tracing::warn!(agent_type, %status, "agent service returned an error status");
            return AgentResponse::failure(format!("HTTP {status}: {error_body}"));
        }

        match response.json::<AgentResponse>().await {
            Ok(parsed) => parsed,
            Err(e) if e.is_timeout() => AgentResponse::failure("Agent call timed out"),
            Err(e) => {
                tracing::warn!(agent_type, error = %e, "undecodable agent response");
                AgentResponse::failure(format!("Agent call failed: invalid response: {e}"))
            }
        }
    }
}
