//! Parameter schema declarations and computed-variable rules.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub mod validation;

pub use validation::{ParameterViolation, ViolationKind, validate_parameters};

/// Declared parameters keyed by name in authoring order.
pub type ParameterSchema = IndexMap<String, ParameterSpec>;

/// Declarative rules for a single scenario parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ParameterSpec {
    #[serde(default, rename = "type")]
    pub r#type: ParameterType,
    /// Regular expression string values must match.
    #[serde(default)]
    pub pattern: Option<String>,
    /// Closed set of accepted values.
    #[serde(default, rename = "enum")]
    pub enum_values: Vec<JsonValue>,
    #[serde(default)]
    pub default: Option<JsonValue>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// Primitive parameter types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    #[default]
    String,
    Number,
    Boolean,
}

impl ParameterType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }
}

/// Derived variable: the source parameter when non-empty, otherwise the fallback template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComputedVariable {
    pub name: String,
    #[serde(default)]
    pub source: Option<String>,
    pub fallback: String,
}
