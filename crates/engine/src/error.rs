//! Error types raised while resolving and provisioning scenarios.

use std::fmt;

use demoforge_api::ApiError;
use demoforge_types::{ParameterViolation, PipelinePhase, ResourceKind};
use demoforge_util::{ConfigError, SessionStoreError, redact_sensitive};
use thiserror::Error;

use crate::catalog::CatalogError;

/// Failure while building the variable context or substituting a definition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("{path}: unresolved reference '${{{name}}}'")]
    Unresolved { path: String, name: String },

    #[error("{path}: unterminated '${{' in '{text}'")]
    Unterminated { path: String, text: String },

    #[error("{path}: empty reference '${{}}'")]
    EmptyReference { path: String },

    #[error("{path}: '{name}' references '{reference}', which is computed later")]
    ForwardReference { path: String, name: String, reference: String },

    #[error("{path}: expected {expected}, found '{found}'")]
    Conversion { path: String, expected: &'static str, found: String },

    #[error("{path}: conditional operations are gated on '{name}', which is not a boolean (found '{found}')")]
    NonBooleanCondition { path: String, name: String, found: String },
}

impl ResolutionError {
    /// Field path the error points at.
    pub fn path(&self) -> &str {
        match self {
            Self::Unresolved { path, .. }
            | Self::Unterminated { path, .. }
            | Self::EmptyReference { path }
            | Self::ForwardReference { path, .. }
            | Self::Conversion { path, .. }
            | Self::NonBooleanCondition { path, .. } => path,
        }
    }
}

/// Why a cross reference could not be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyReason {
    /// No declaration in the scenario produces the name.
    Undeclared,
    /// The name is declared but no resource was recorded for it during the run.
    NotCreated,
}

impl fmt::Display for DependencyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undeclared => f.write_str("is not declared"),
            Self::NotCreated => f.write_str("was not created in this run"),
        }
    }
}

/// Reference to a name that no earlier phase produces.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{owner_kind} '{owner}' references {target_kind} '{target}', which {reason}")]
pub struct DependencyError {
    pub owner_kind: ResourceKind,
    pub owner: String,
    pub target_kind: ResourceKind,
    pub target: String,
    pub reason: DependencyReason,
}

/// One external call that failed for a pipeline item. Siblings keep running.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{phase} '{item}': {message}")]
pub struct PlatformError {
    pub phase: PipelinePhase,
    pub item: String,
    /// Redacted failure description.
    pub message: String,
    pub status: Option<u16>,
}

impl PlatformError {
    pub fn new(phase: PipelinePhase, item: impl Into<String>, message: impl AsRef<str>) -> Self {
        Self {
            phase,
            item: item.into(),
            message: redact_sensitive(message.as_ref()),
            status: None,
        }
    }

    pub fn from_api(phase: PipelinePhase, item: impl Into<String>, error: &ApiError) -> Self {
        Self {
            status: error.status(),
            ..Self::new(phase, item, error.to_string())
        }
    }
}

/// Top-level failure of an engine operation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown scenario '{0}'")]
    UnknownScenario(String),

    #[error("invalid parameters: {}", join_errors(.0))]
    InvalidParameters(Vec<ParameterViolation>),

    #[error("scenario resolution failed: {}", join_errors(.0))]
    Resolution(Vec<ResolutionError>),

    #[error("unsatisfied dependencies: {}", join_errors(.0))]
    Dependencies(Vec<DependencyError>),

    #[error("session '{0}' not found")]
    SessionNotFound(String),

    #[error("session '{0}' is still running")]
    SessionActive(String),

    #[error(transparent)]
    Store(#[from] SessionStoreError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl EngineError {
    /// True for errors reported before any external call was made.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidParameters(_) | Self::Resolution(_) | Self::Dependencies(_))
    }
}

fn join_errors<E: fmt::Display>(errors: &[E]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use demoforge_types::ViolationKind;

    #[test]
    fn resolution_errors_name_path_and_reference() {
        let error = ResolutionError::Unresolved {
            path: "repositories[0].name".into(),
            name: "missing".into(),
        };
        assert_eq!(error.to_string(), "repositories[0].name: unresolved reference '${missing}'");
        assert_eq!(error.path(), "repositories[0].name");
    }

    #[test]
    fn platform_errors_redact_secrets() {
        let error = PlatformError::new(PipelinePhase::TokenInjection, "dev", "rejected FM_TOKEN=abc123");
        assert_eq!(error.message, "rejected FM_TOKEN=[REDACTED]");
        assert_eq!(error.to_string(), "token_injection 'dev': rejected FM_TOKEN=[REDACTED]");
    }

    #[test]
    fn validation_errors_list_every_violation() {
        let error = EngineError::InvalidParameters(vec![
            ParameterViolation {
                parameter: "project_name".into(),
                kind: ViolationKind::Required,
            },
            ParameterViolation {
                parameter: "region".into(),
                kind: ViolationKind::Enum,
            },
        ]);
        let message = error.to_string();
        assert!(message.contains("project_name"));
        assert!(message.contains("region"));
        assert!(error.is_validation());
    }
}
