//! Workflow definition loading and linting.
//!
//! Definitions arrive as YAML or JSON. `lint_definition` is an authoring aid
//! for `orchestra validate`; the engine runs definitions as given and
//! reports cycles at run time.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use orchestra_types::workflow::WorkflowDefinition;
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DefinitionError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported definition format: {0}")]
    UnsupportedFormat(String),

    #[error("duplicate step ID: '{0}'")]
    DuplicateStepId(String),

    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("cycle detected involving step '{0}'")]
    CycleDetected(String),

    #[error("global timeout must be > 0")]
    InvalidGlobalTimeout,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

pub fn parse_definition_yaml(yaml: &str) -> Result<WorkflowDefinition, DefinitionError> {
    serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::Parse(e.to_string()))
}

pub fn parse_definition_json(json: &str) -> Result<WorkflowDefinition, DefinitionError> {
    serde_json::from_str(json).map_err(|e| DefinitionError::Parse(e.to_string()))
}

/// Load a definition file, picking the parser from the extension
/// (`.yaml`, `.yml`, `.json`).
pub fn load_definition_file(path: &Path) -> Result<WorkflowDefinition, DefinitionError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let content = std::fs::read_to_string(path)?;
    match ext.as_str() {
        "yaml" | "yml" => parse_definition_yaml(&content),
        "json" => parse_definition_json(&content),
        _ => Err(DefinitionError::UnsupportedFormat(path.display().to_string())),
    }
}

// ---------------------------------------------------------------------------
// Linting
// ---------------------------------------------------------------------------

/// Check structural constraints on a definition.
///
/// Checks, in order:
/// - step IDs are unique
/// - every `depends_on` entry names a step in the definition
/// - the dependency graph is acyclic
/// - the global timeout is positive
///
/// A step timeout of 0 is allowed; the engine substitutes its configured
/// default.
pub fn lint_definition(def: &WorkflowDefinition) -> Result<(), DefinitionError> {
    let mut seen = HashSet::new();
    for step in &def.steps {
        if !seen.insert(step.id.as_str()) {
            return Err(DefinitionError::DuplicateStepId(step.id.clone()));
        }
    }

    for step in &def.steps {
        if let Some(dep) = step.depends_on.iter().find(|d| !seen.contains(d.as_str())) {
            return Err(DefinitionError::UnknownDependency {
                step: step.id.clone(),
                dependency: dep.clone(),
            });
        }
    }

    // Edge from dependency to dependent.
    let mut graph = DiGraph::<&str, ()>::new();
    let nodes: HashMap<&str, _> = def
        .steps
        .iter()
        .map(|s| (s.id.as_str(), graph.add_node(s.id.as_str())))
        .collect();
    for step in &def.steps {
        for dep in &step.depends_on {
            graph.add_edge(nodes[dep.as_str()], nodes[step.id.as_str()], ());
        }
    }
    toposort(&graph, None)
        .map_err(|cycle| DefinitionError::CycleDetected(graph[cycle.node_id()].to_string()))?;

    if def.global_timeout_secs == 0 {
        return Err(DefinitionError::InvalidGlobalTimeout);
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
