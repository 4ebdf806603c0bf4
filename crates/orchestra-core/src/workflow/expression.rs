//! Mapping-value and condition resolution against a run's shared context.
//!
//! `ExpressionResolver` turns the strings found in `input_mapping` and
//! `condition` into concrete JSON values and booleans. Resolution itself is
//! fallible (`try_*` methods); the infallible wrappers apply the configured
//! [`FallbackPolicy`] and log what they swallowed.
//!
//! Compound conditions (`and` / `or` / `not`) are handed to the small
//! boolean-expression parser in [`super::condition`]. Nothing here executes
//! dynamic code.

use std::collections::HashMap;

use orchestra_types::config::FallbackPolicy;
use orchestra_types::workflow::Context;
use serde_json::Value;

use super::condition::{self, CompareOp};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while resolving a mapping value or condition.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    /// A dot-path did not lead to a value.
    #[error("path '{0}' does not resolve in context")]
    UnresolvedPath(String),

    /// A bare word is neither a literal nor a context key.
    #[error("context key '{0}' not found")]
    UnknownKey(String),

    /// A `${...}` variable in a condition does not resolve.
    #[error("missing variable '{0}'")]
    MissingVariable(String),

    /// A simple condition is not of the form `left operator right`.
    #[error("malformed condition '{0}': expected `left operator right`")]
    Malformed(String),

    #[error("unknown operator '{0}'")]
    UnknownOperator(String),

    /// An ordering operator was applied to a non-numeric operand.
    #[error("value {0} is not numeric")]
    NotNumeric(Value),

    /// A membership operator was applied to a value that cannot contain things.
    #[error("value {0} is not a container")]
    NotContainer(Value),

    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("unexpected end of expression")]
    UnexpectedEnd,
}

// ---------------------------------------------------------------------------
// ExpressionResolver
// ---------------------------------------------------------------------------

/// Resolves mapping values and evaluates step conditions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionResolver {
    policy: FallbackPolicy,
}

impl ExpressionResolver {
    pub fn new(policy: FallbackPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> FallbackPolicy {
        self.policy
    }

    /// Resolve a mapping value, first matching rule wins:
    ///
    /// 1. contains `${path}` -> string with every placeholder substituted
    ///    (`MISSING(path)` for paths that do not resolve)
    /// 2. wrapped in matching quotes -> the unquoted string
    /// 3. all ASCII digits -> integer
    /// 4. parses as a float -> float
    /// 5. `true` / `false` / `null` / `none` (any case)
    /// 6. starts with `{` or `[` and parses as JSON -> that JSON
    /// 7. contains `.` -> dot-path lookup
    /// 8. a context key -> its value
    ///
    /// Rules 7 and 8 fail with `UnresolvedPath` / `UnknownKey` when nothing
    /// is found.
    pub fn try_resolve_mapping_value(
        &self,
        raw: &str,
        context: &Context,
    ) -> Result<Value, ExpressionError> {
        if let Some(substituted) = substitute_variables_with(raw, |path| {
            Ok(resolve_dot_path(path, context)
                .map(value_to_string)
                .unwrap_or_else(|| format!("MISSING({path})")))
        })? {
            return Ok(Value::String(substituted));
        }

        if let Some(inner) = strip_quotes(raw) {
            return Ok(Value::String(inner.to_string()));
        }

        if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = raw.parse::<u64>() {
                return Ok(Value::from(n));
            }
        }

        if let Some(n) = raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
        {
            return Ok(Value::Number(n));
        }

        match raw.to_ascii_lowercase().as_str() {
            "true" => return Ok(Value::Bool(true)),
            "false" => return Ok(Value::Bool(false)),
            "null" | "none" => return Ok(Value::Null),
            _ => {}
        }

        if raw.starts_with('{') || raw.starts_with('[') {
            if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
                return Ok(parsed);
            }
        }

        if raw.contains('.') {
            return resolve_dot_path(raw, context)
                .cloned()
                .ok_or_else(|| ExpressionError::UnresolvedPath(raw.to_string()));
        }

        context
            .get(raw)
            .cloned()
            .ok_or_else(|| ExpressionError::UnknownKey(raw.to_string()))
    }

    /// Resolve a mapping value, never failing.
    ///
    /// A dot-path that does not resolve yields `null`. Any other unresolved
    /// value is passed through as the literal string.
    pub fn resolve_mapping_value(&self, raw: &str, context: &Context) -> Value {
        match self.try_resolve_mapping_value(raw, context) {
            Ok(value) => value,
            Err(ExpressionError::UnresolvedPath(path)) => {
                tracing::debug!(path = %path, "dot path not found, resolving to null");
                Value::Null
            }
            Err(err) => {
                tracing::warn!(value = raw, error = %err, "using mapping value as literal");
                Value::String(raw.to_string())
            }
        }
    }

    /// Resolve a condition operand: as `resolve_mapping_value` when
    /// lenient, failing on an unresolved name when strict.
    pub(crate) fn resolve_operand(
        &self,
        raw: &str,
        context: &Context,
    ) -> Result<Value, ExpressionError> {
        match self.policy {
            FallbackPolicy::Lenient => Ok(self.resolve_mapping_value(raw, context)),
            FallbackPolicy::Strict => self.try_resolve_mapping_value(raw, context),
        }
    }

    /// Resolve every entry of a step's `input_mapping`.
    ///
    /// Under `Lenient` this never fails. Under `Strict` the first unresolved
    /// entry is returned as an error.
    pub fn resolve_input(
        &self,
        mapping: &HashMap<String, String>,
        context: &Context,
    ) -> Result<Context, ExpressionError> {
        let mut input = Context::new();
        for (key, raw) in mapping {
            let value = match self.policy {
                FallbackPolicy::Lenient => self.resolve_mapping_value(raw, context),
                FallbackPolicy::Strict => self.try_resolve_mapping_value(raw, context)?,
            };
            input.insert(key.clone(), value);
        }
        Ok(input)
    }

    /// Evaluate a condition string to a boolean.
    ///
    /// `${...}` variables are substituted first (a missing variable is an
    /// error here). The result is either a compound expression containing
    /// ` and `, ` or ` or ` not `, or exactly `left operator right`.
    pub fn try_evaluate_condition(
        &self,
        condition: &str,
        context: &Context,
    ) -> Result<bool, ExpressionError> {
        let substituted = substitute_variables_with(condition, |path| {
            resolve_dot_path(path, context)
                .map(value_to_string)
                .ok_or_else(|| ExpressionError::MissingVariable(path.to_string()))
        })?;
        let expr = substituted.as_deref().unwrap_or(condition).trim();

        if [" and ", " or ", " not "].iter().any(|op| expr.contains(op)) {
            return condition::evaluate(expr, self, context);
        }

        let parts: Vec<&str> = expr.split_whitespace().collect();
        let [left, operator, right] = parts.as_slice() else {
            return Err(ExpressionError::Malformed(expr.to_string()));
        };
        let op = CompareOp::parse(operator)
            .ok_or_else(|| ExpressionError::UnknownOperator(operator.to_string()))?;

        let left = self.resolve_operand(left, context)?;
        let right = self.resolve_operand(right, context)?;
        op.apply(&left, &right)
    }

    /// Evaluate a condition, falling back per policy on any error
    /// (`true` when lenient, `false` when strict).
    pub fn evaluate_condition(&self, condition: &str, context: &Context) -> bool {
        match self.try_evaluate_condition(condition, context) {
            Ok(result) => result,
            Err(err) => {
                let fallback = matches!(self.policy, FallbackPolicy::Lenient);
                tracing::warn!(
                    condition,
                    error = %err,
                    fallback,
                    "condition evaluation failed"
                );
                fallback
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Context helpers
// ---------------------------------------------------------------------------

/// Walk `path` (split on `.`) through nested objects.
///
/// Returns `None` when a key is missing, a non-object is reached before the
/// end of the path, or the value found is `null`.
pub fn resolve_dot_path<'a>(path: &str, context: &'a Context) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = context.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    (!current.is_null()).then_some(current)
}

/// Set `value` at a dot-path, creating intermediate objects.
///
/// Intermediate values that are not objects are replaced by empty objects.
pub fn set_nested_value(context: &mut Context, path: &str, value: Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(last) = segments.pop() else {
        return;
    };

    let mut current = context;
    for segment in segments {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Context::new()));
        if !slot.is_object() {
            tracing::warn!(path, segment, "overwriting non-object context value");
            *slot = Value::Object(Context::new());
        }
        let Value::Object(next) = slot else {
            return;
        };
        current = next;
    }
    current.insert(last.to_string(), value);
}

/// Replace every `${path}` in `text` with the string form of its value, or
/// `MISSING(path)` when it does not resolve.
pub fn substitute_variables(text: &str, context: &Context) -> String {
    let substituted = substitute_variables_with(text, |path| {
        Ok(resolve_dot_path(path, context)
            .map(value_to_string)
            .unwrap_or_else(|| format!("MISSING({path})")))
    });
    match substituted {
        Ok(Some(s)) => s,
        _ => text.to_string(),
    }
}

/// String form used when a value is spliced into text: strings raw,
/// everything else as compact JSON.
pub(crate) fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Scan `text` for `${...}` placeholders with a non-empty body.
///
/// Returns `Ok(None)` when there are none, so callers can tell "no
/// placeholders" apart from "substituted to the same text".
fn substitute_variables_with<F>(
    text: &str,
    mut replace: F,
) -> Result<Option<String>, ExpressionError>
where
    F: FnMut(&str) -> Result<String, ExpressionError>,
{
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut found = false;

    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if end > 0 => {
                out.push_str(&rest[..start]);
                out.push_str(&replace(&after[..end])?);
                rest = &after[end + 1..];
                found = true;
            }
            _ => {
                out.push_str(&rest[..start + 2]);
                rest = after;
            }
        }
    }

    if !found {
        return Ok(None);
    }
    out.push_str(rest);
    Ok(Some(out))
}

fn strip_quotes(raw: &str) -> Option<&str> {
    if raw.len() < 2 {
        return None;
    }
    ['"', '\'']
        .into_iter()
        .find(|&q| raw.starts_with(q) && raw.ends_with(q))
        .map(|_| &raw[1..raw.len() - 1])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
