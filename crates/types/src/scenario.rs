//! Strongly typed scenario definitions.
//!
//! A scenario describes a complete demo environment: the repositories to generate from
//! templates, the platform components bound to them, the environments and applications that
//! wire everything together, and the feature flags configured across environments.
//!
//! Definitions are authored in YAML or JSON. Any string may contain `${name}` or
//! `${env.NAME}` references; fields that are booleans after resolution are declared as
//! [`Templated`] so an author can bind them to a parameter (`create_component: "${with_ci}"`).
//! The resolver produces the concrete [`resolved`] counterparts consumed by the pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::parameters::{ComputedVariable, ParameterSchema, ParameterType};

pub mod resolved;

pub use resolved::{EnvironmentVariable, ResolvedEnvironment, ResolvedRepository, ResolvedScenario};

/// Complete, immutable scenario definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ScenarioDefinition {
    /// Stable identifier used by callers to select the scenario.
    pub id: String,
    /// Optional display name for pickers.
    #[serde(default)]
    pub name: Option<String>,
    /// Optional descriptive copy.
    #[serde(default)]
    pub description: Option<String>,
    /// Marks scenarios that are still being authored.
    #[serde(default)]
    pub wip: bool,
    /// Repositories generated from template sources, in authoring order.
    #[serde(default)]
    pub repositories: Vec<RepositorySpec>,
    /// Platform environments to create.
    #[serde(default)]
    pub environments: Vec<EnvironmentSpec>,
    /// Applications linking components and environments.
    #[serde(default)]
    pub applications: Vec<ApplicationSpec>,
    /// Feature flags registered and configured by the run.
    #[serde(default)]
    pub flags: Vec<FlagSpec>,
    /// Declared parameters keyed by name, preserving authoring order.
    #[serde(default)]
    pub parameter_schema: ParameterSchema,
    /// Derived variables evaluated in declaration order.
    #[serde(default)]
    pub computed_variables: Vec<ComputedVariable>,
    /// Organization-level properties the scenario expects to exist.
    #[serde(default)]
    pub required_properties: Vec<String>,
    /// Organization-level secrets the scenario expects to exist.
    #[serde(default)]
    pub required_secrets: Vec<String>,
}

impl ScenarioDefinition {
    /// Returns the display name, falling back to the identifier.
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.id,
        }
    }
}

/// A value that is either authored literally or produced by a template.
///
/// After substitution a template is expected to render the textual form of `T`
/// (`"true"`/`"false"` for booleans, a decimal literal for numbers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Templated<T> {
    Literal(T),
    Template(String),
}

impl<T: Default> Default for Templated<T> {
    fn default() -> Self {
        Self::Literal(T::default())
    }
}

/// Failure converting rendered template text into a typed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionError {
    pub expected: &'static str,
    pub found: String,
}

impl Templated<bool> {
    /// Converts the rendered value into a boolean.
    pub fn coerce(&self) -> Result<bool, ConversionError> {
        match self {
            Self::Literal(value) => Ok(*value),
            Self::Template(text) => parse_bool_text(text).ok_or_else(|| ConversionError {
                expected: "boolean",
                found: text.clone(),
            }),
        }
    }
}

/// Parses the canonical textual booleans produced by templates.
pub fn parse_bool_text(text: &str) -> Option<bool> {
    match text.trim() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Parses numeric text into a JSON number, preferring integers.
pub fn parse_number_text(text: &str) -> Option<JsonValue> {
    let trimmed = text.trim();
    if let Ok(integer) = trimmed.parse::<i64>() {
        return Some(JsonValue::from(integer));
    }
    trimmed
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(JsonValue::Number)
}

/// Repository generated from a template source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RepositorySpec {
    /// Target repository name inside the organization.
    pub name: String,
    /// Template source in `owner/repository` form.
    pub source: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub private: Templated<bool>,
    /// When true a platform component bound to the repository is created.
    #[serde(default)]
    pub create_component: Templated<bool>,
    /// Component name; defaults to the repository name.
    #[serde(default)]
    pub component_name: Option<String>,
    /// Content replacements applied to files of the generated repository.
    #[serde(default)]
    pub replacements: Vec<FileReplacement>,
    /// File operations gated on boolean parameters.
    #[serde(default)]
    pub conditional_operations: Vec<ConditionalFileOperations>,
    /// Repository secrets sealed with the repository public key before upload.
    #[serde(default)]
    pub secrets: Vec<RepositorySecret>,
}

/// Ordered find/replace pairs applied to a single file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FileReplacement {
    pub path: String,
    #[serde(default)]
    pub values: indexmap::IndexMap<String, String>,
}

/// File operations selected by the resolved value of a boolean parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ConditionalFileOperations {
    /// Name of the boolean parameter (or computed variable) deciding the branch.
    pub when: String,
    #[serde(default)]
    pub when_true: Vec<FileOperation>,
    #[serde(default)]
    pub when_false: Vec<FileOperation>,
}

/// A single repository file manipulation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FileOperation {
    Move { from: String, to: String },
    Copy { from: String, to: String },
    Delete { path: String },
}

/// Repository secret declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepositorySecret {
    pub name: String,
    pub value: String,
}

/// Platform environment declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EnvironmentSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub variables: Vec<EnvironmentVariableSpec>,
    /// When true an access key scoped to the environment is minted and injected.
    #[serde(default)]
    pub create_fm_token_var: Templated<bool>,
}

/// Environment variable declaration; `type` drives conversion of rendered text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvironmentVariableSpec {
    pub name: String,
    pub value: JsonValue,
    #[serde(default, rename = "type")]
    pub value_type: Option<ParameterType>,
    #[serde(default)]
    pub secret: bool,
}

/// Application declaration linking components and environments by name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ApplicationSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Repository whose URL is attached to the application, by repository name.
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub environments: Vec<String>,
}

/// Feature flag declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FlagSpec {
    pub name: String,
    #[serde(default, rename = "type")]
    pub flag_type: FlagType,
    #[serde(default)]
    pub description: Option<String>,
    /// Environments in which the flag is configured.
    #[serde(default)]
    pub environments: Vec<String>,
}

/// Value type of a feature flag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FlagType {
    #[default]
    Boolean,
    String,
    Number,
}

impl FlagType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::String => "string",
            Self::Number => "number",
        }
    }
}
