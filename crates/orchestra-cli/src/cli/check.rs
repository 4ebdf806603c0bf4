//! `orchestra check`: agent service health.

use anyhow::{Context, Result, bail};
use console::style;

use orchestra_infra::agent::HttpAgentInvoker;
use orchestra_types::config::ServiceConfig;

pub async fn handle_check(config: &ServiceConfig, json: bool) -> Result<()> {
    let invoker =
        HttpAgentInvoker::new(&config.agent_service).context("Failed to build agent HTTP client")?;
    let url = format!("{}{}", invoker.base_url(), config.agent_service.health_path);

    let (healthy, detail) = match invoker.health().await {
        Ok(true) => (true, None),
        Ok(false) => (false, Some("health endpoint returned an error status".to_string())),
        Err(e) => (false, Some(format!("unreachable: {e}"))),
    };

    if json {
        let check = serde_json::json!({
            "url": url,
            "healthy": healthy,
            "error": detail,
        });
        println!("{}", serde_json::to_string_pretty(&check)?);
    } else {
        let mark = if healthy {
            style("✓").green()
        } else {
            style("✗").red()
        };
        println!();
        println!("  {} Agent service at {}", mark, style(&url).cyan());
        if let Some(detail) = &detail {
            println!("    {}", style(detail).dim());
        }
        println!();
    }

    if !healthy {
        bail!("Agent service at {url} is not healthy");
    }
    Ok(())
}
