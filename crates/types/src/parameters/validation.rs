//! Parameter schema validation.
//!
//! Callers (web forms, the CLI) hand over loosely shaped values: numbers and booleans often
//! arrive as text. Validation accepts those shapes, coerces them to the declared type, and
//! reports every violation instead of stopping at the first one.

use regex::Regex;
use serde_json::{Map as JsonMap, Value};
use thiserror::Error;

use super::{ParameterSchema, ParameterSpec, ParameterType};
use crate::scenario::{parse_bool_text, parse_number_text};

/// Reason a parameter value was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationKind {
    Required,
    Type { expected: ParameterType },
    Pattern { pattern: String },
    InvalidPattern { pattern: String, reason: String },
    Enum,
}

/// A single rejected parameter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parameter '{parameter}': {}", describe(.kind))]
pub struct ParameterViolation {
    pub parameter: String,
    pub kind: ViolationKind,
}

fn describe(kind: &ViolationKind) -> String {
    match kind {
        ViolationKind::Required => "value is required".to_string(),
        ViolationKind::Type { expected } => format!("value must be a {}", expected.as_str()),
        ViolationKind::Pattern { pattern } => format!("value must match the pattern {}", pattern),
        ViolationKind::InvalidPattern { pattern, reason } => format!("invalid pattern '{}': {}", pattern, reason),
        ViolationKind::Enum => "value is not in the allowed set".to_string(),
    }
}

/// Validate candidate values against a schema.
///
/// Declared properties are checked in authoring order; defaults fill absent values and
/// undeclared keys are ignored. On success the returned map holds type-coerced values for
/// every declared property that has one.
pub fn validate_parameters(schema: &ParameterSchema, candidates: &JsonMap<String, Value>) -> Result<JsonMap<String, Value>, Vec<ParameterViolation>> {
    let mut accepted = JsonMap::new();
    let mut violations = Vec::new();

    for (name, spec) in schema {
        let candidate = candidates.get(name).filter(|value| !is_empty(value)).or(spec.default.as_ref()).filter(|value| !is_empty(value));

        let Some(candidate) = candidate else {
            if spec.required {
                violations.push(violation(name, ViolationKind::Required));
            }
            continue;
        };

        match validate_candidate_value(candidate, spec) {
            Ok(value) => {
                accepted.insert(name.clone(), value);
            }
            Err(kind) => violations.push(violation(name, kind)),
        }
    }

    if violations.is_empty() { Ok(accepted) } else { Err(violations) }
}

/// Validate and coerce one candidate against its declaration.
pub fn validate_candidate_value(candidate: &Value, spec: &ParameterSpec) -> Result<Value, ViolationKind> {
    let value = coerce_to_type(candidate, spec.r#type).ok_or(ViolationKind::Type { expected: spec.r#type })?;

    if let (Some(pattern), Value::String(text)) = (&spec.pattern, &value) {
        let regex = Regex::new(pattern).map_err(|error| ViolationKind::InvalidPattern {
            pattern: pattern.clone(),
            reason: error.to_string(),
        })?;
        if !regex.is_match(text) {
            return Err(ViolationKind::Pattern { pattern: pattern.clone() });
        }
    }

    if !spec.enum_values.is_empty() && !spec.enum_values.iter().any(|allowed| json_values_match(allowed, &value)) {
        return Err(ViolationKind::Enum);
    }

    Ok(value)
}

fn coerce_to_type(candidate: &Value, expected: ParameterType) -> Option<Value> {
    match (expected, candidate) {
        (ParameterType::String, Value::String(_)) => Some(candidate.clone()),
        (ParameterType::Number, Value::Number(_)) => Some(candidate.clone()),
        (ParameterType::Number, Value::String(text)) => parse_number_text(text),
        (ParameterType::Boolean, Value::Bool(_)) => Some(candidate.clone()),
        (ParameterType::Boolean, Value::String(text)) => parse_bool_text(text).map(Value::Bool),
        _ => None,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        _ => false,
    }
}

fn violation(name: &str, kind: ViolationKind) -> ParameterViolation {
    ParameterViolation {
        parameter: name.to_string(),
        kind,
    }
}

fn json_values_match(expected: &Value, candidate: &Value) -> bool {
    if expected == candidate {
        return true;
    }
    match (expected, candidate) {
        (Value::String(expected_text), Value::String(candidate_text)) => expected_text == candidate_text,
        (Value::String(expected_text), other) => expected_text == &other.to_string(),
        (Value::Number(expected_number), Value::Number(candidate_number)) => expected_number.as_f64() == candidate_number.as_f64(),
        (other, Value::String(candidate_text)) => match serde_json::from_str::<Value>(candidate_text) {
            Ok(parsed) => other == &parsed,
            Err(_) => false,
        },
        _ => false,
    }
}
