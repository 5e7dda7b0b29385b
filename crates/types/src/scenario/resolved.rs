//! Concrete scenario instance produced by variable resolution.
//!
//! Every string has been substituted, every templated boolean converted, and conditional
//! file operations have been narrowed to the branch selected for this run.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::{ApplicationSpec, FileOperation, FileReplacement, FlagSpec, RepositorySecret};

/// Fully resolved scenario ready for the provisioning pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ResolvedScenario {
    pub scenario_id: String,
    pub repositories: Vec<ResolvedRepository>,
    pub environments: Vec<ResolvedEnvironment>,
    pub applications: Vec<ApplicationSpec>,
    pub flags: Vec<FlagSpec>,
}

impl ResolvedScenario {
    /// Repositories that request a platform component.
    pub fn component_repositories(&self) -> impl Iterator<Item = &ResolvedRepository> {
        self.repositories.iter().filter(|repository| repository.create_component)
    }

    /// Total number of resources a run would create.
    pub fn planned_resource_count(&self) -> usize {
        self.repositories.len() + self.component_repositories().count() + self.flags.len() + self.environments.len() + self.applications.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ResolvedRepository {
    /// Position of the repository in the definition.
    pub spec_index: usize,
    pub name: String,
    pub source: String,
    pub description: Option<String>,
    pub private: bool,
    pub create_component: bool,
    pub component_name: String,
    pub replacements: Vec<FileReplacement>,
    /// Operations of the selected conditional branches, in authoring order.
    pub file_operations: Vec<FileOperation>,
    pub secrets: Vec<RepositorySecret>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ResolvedEnvironment {
    pub spec_index: usize,
    pub name: String,
    pub description: Option<String>,
    pub variables: Vec<EnvironmentVariable>,
    pub create_fm_token_var: bool,
}

/// Environment variable with its final typed value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: JsonValue,
    #[serde(default)]
    pub secret: bool,
}
