//! Ordered provisioning phases.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One stage of the provisioning pipeline. Declaration order is execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    RepositoryCreation,
    ComponentCreation,
    FlagDefinition,
    EnvironmentCreation,
    ApplicationCreation,
    TokenInjection,
    FlagConfiguration,
}

impl PipelinePhase {
    pub const ALL: [PipelinePhase; 7] = [
        Self::RepositoryCreation,
        Self::ComponentCreation,
        Self::FlagDefinition,
        Self::EnvironmentCreation,
        Self::ApplicationCreation,
        Self::TokenInjection,
        Self::FlagConfiguration,
    ];

    /// Stable identifier, also used as the progress task id.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RepositoryCreation => "repository_creation",
            Self::ComponentCreation => "component_creation",
            Self::FlagDefinition => "flag_definition",
            Self::EnvironmentCreation => "environment_creation",
            Self::ApplicationCreation => "application_creation",
            Self::TokenInjection => "token_injection",
            Self::FlagConfiguration => "flag_configuration",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::RepositoryCreation => "Creating repositories",
            Self::ComponentCreation => "Creating components",
            Self::FlagDefinition => "Defining feature flags",
            Self::EnvironmentCreation => "Creating environments",
            Self::ApplicationCreation => "Creating applications",
            Self::TokenInjection => "Injecting flag-management tokens",
            Self::FlagConfiguration => "Configuring feature flags",
        }
    }
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
