//! Shared type definitions for the Demoforge workspace.
//!
//! The scenario model is parsed once from YAML/JSON and shared read-only across runs. Sessions,
//! resource records, and progress events are the durable and ephemeral outputs of a run.

pub mod event;
pub mod parameters;
pub mod phase;
pub mod resource;
pub mod scenario;
pub mod session;

pub use event::ProgressEvent;
pub use parameters::{ComputedVariable, ParameterSchema, ParameterSpec, ParameterType, ParameterViolation, ViolationKind, validate_parameters};
pub use phase::PipelinePhase;
pub use resource::{ResourceKind, ResourceRecord};
pub use scenario::{
    ApplicationSpec, ConditionalFileOperations, EnvironmentSpec, EnvironmentVariable, EnvironmentVariableSpec, FileOperation,
    FileReplacement, FlagSpec, FlagType, RepositorySecret, RepositorySpec, ResolvedEnvironment, ResolvedRepository, ResolvedScenario,
    ScenarioDefinition, Templated,
};
pub use session::{DeletionRecord, Session, SessionFilter, SessionStatus};
