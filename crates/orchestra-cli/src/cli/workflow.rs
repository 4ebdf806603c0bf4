//! `orchestra run` and `orchestra validate`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use orchestra_core::repository::execution::ExecutionStore;
use orchestra_core::workflow::controller::ExecutionController;
use orchestra_core::workflow::definition::{lint_definition, load_definition_file};
use orchestra_infra::agent::HttpAgentInvoker;
use orchestra_infra::memory::InMemoryExecutionStore;
use orchestra_types::config::ServiceConfig;
use orchestra_types::workflow::{Context, StepStatus, WorkflowExecution, WorkflowStatus};

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Load `file`, run it to completion through the controller, and print the
/// outcome. Fails when the workflow does not complete.
pub async fn handle_run(
    file: &Path,
    inputs: &[String],
    input_json: Option<&str>,
    config: &ServiceConfig,
    json: bool,
) -> Result<()> {
    let definition = load_definition_file(file)
        .with_context(|| format!("Failed to load workflow from {}", file.display()))?;
    let input = parse_inputs(input_json, inputs)?;

    let invoker = Arc::new(
        HttpAgentInvoker::new(&config.agent_service).context("Failed to build agent HTTP client")?,
    );
    let store = Arc::new(InMemoryExecutionStore::new());
    store
        .store_definition(&definition)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to register workflow: {e}"))?;

    let controller = Arc::new(ExecutionController::new(invoker, store, &config.engine));
    let shutdown = CancellationToken::new();
    let cleanup = controller.spawn_cleanup_loop(
        Duration::from_secs(config.engine.cleanup_interval_secs.max(1)),
        shutdown.clone(),
    );

    let execution = WorkflowExecution::new(definition.id, input);
    let execution_id = controller.start(definition.clone(), execution).await?;

    if !json {
        println!();
        println!(
            "  {} Running '{}' ({} steps)",
            style("*").cyan().bold(),
            style(&definition.name).cyan(),
            definition.steps.len()
        );
        println!("  Execution: {}", style(execution_id).dim());
    }

    let finished = tokio::select! {
        finished = controller.wait(&execution_id) => finished,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(execution_id = %execution_id, "interrupted, cancelling execution");
            controller.cancel(&execution_id).await;
            None
        }
    };
    shutdown.cancel();
    if let Err(e) = cleanup.await {
        tracing::debug!(error = %e, "cleanup loop ended abnormally");
    }
    let Some(execution) = finished else {
        bail!("Workflow execution {execution_id} was cancelled");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&execution)?);
    } else {
        print_execution(&definition.name, &execution);
    }

    if execution.status != WorkflowStatus::Completed {
        bail!(
            "Workflow {}: {}",
            execution.status,
            execution.error_message.as_deref().unwrap_or("no error recorded")
        );
    }
    Ok(())
}

/// Build the seed context: the `--input-json` object first, then each
/// `KEY=VALUE` on top of it.
fn parse_inputs(input_json: Option<&str>, pairs: &[String]) -> Result<Context> {
    let mut input = match input_json {
        Some(raw) => match serde_json::from_str::<Value>(raw).context("Invalid --input-json")? {
            Value::Object(map) => map,
            other => bail!("--input-json must be a JSON object, got {other}"),
        },
        None => Context::new(),
    };

    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("Invalid --input '{pair}': expected KEY=VALUE");
        };
        if key.is_empty() {
            bail!("Invalid --input '{pair}': empty key");
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        input.insert(key.to_string(), value);
    }
    Ok(input)
}

fn print_execution(name: &str, execution: &WorkflowExecution) {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Retries"),
            Cell::new("Agent"),
            Cell::new("Duration"),
            Cell::new("Error"),
        ]);

    for step in &execution.step_executions {
        let color = match step.status {
            StepStatus::Completed => Color::Green,
            StepStatus::Failed => Color::Red,
            StepStatus::Skipped => Color::DarkGrey,
            StepStatus::Pending | StepStatus::Running => Color::Yellow,
        };
        let duration = match (step.start_time, step.end_time) {
            (Some(start), Some(end)) => format!("{}ms", (end - start).num_milliseconds()),
            _ => "-".to_string(),
        };
        let error = step
            .error_message
            .as_ref()
            .map(|e| e.chars().take(60).collect::<String>())
            .unwrap_or_else(|| "-".to_string());

        table.add_row(vec![
            Cell::new(&step.step_id),
            Cell::new(step.status).fg(color),
            Cell::new(step.retry_attempt),
            Cell::new(step.agent_id.as_deref().unwrap_or("-")),
            Cell::new(duration),
            Cell::new(error),
        ]);
    }

    let progress = execution.progress();
    let status = match execution.status {
        WorkflowStatus::Completed => style(execution.status.as_str()).green().bold(),
        _ => style(execution.status.as_str()).red().bold(),
    };

    println!();
    println!("{table}");
    println!();
    println!(
        "  '{}' finished {} ({}/{} steps, {:.2}%)",
        style(name).cyan(),
        status,
        progress.completed_steps,
        progress.total_steps,
        progress.progress_percentage
    );
    if let Some(error) = &execution.error_message {
        println!("  {}", style(error).red());
    }
    println!();
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

pub fn handle_validate(file: &Path, json: bool) -> Result<()> {
    let definition = load_definition_file(file)
        .with_context(|| format!("Failed to load workflow from {}", file.display()))?;
    let lint = lint_definition(&definition);

    if json {
        let out = serde_json::json!({
            "file": file.display().to_string(),
            "name": definition.name,
            "steps": definition.steps.len(),
            "valid": lint.is_ok(),
            "error": lint.as_ref().err().map(|e| e.to_string()),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if lint.is_ok() {
        println!();
        println!(
            "  {} '{}' is valid ({} steps)",
            style("✓").green(),
            style(&definition.name).cyan(),
            definition.steps.len()
        );
        println!();
    }

    lint.with_context(|| format!("Workflow '{}' failed validation", definition.name))
}
