//! Scenario catalog: loads every definition under a directory and lints it.
//!
//! Definitions are immutable once loaded and handed out as `Arc`s so concurrent runs of the
//! same scenario share one copy.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use demoforge_types::{ParameterType, ScenarioDefinition};
use indexmap::IndexMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::templates::{ENV_PREFIX, TemplateRef, collect_references_from_value};

const SCENARIO_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read scenario directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid scenario file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
    #[error("duplicate scenario id '{id}' in {first} and {second}")]
    DuplicateId { id: String, first: PathBuf, second: PathBuf },
}

/// Load-time finding that does not prevent a scenario from running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintIssue {
    pub scenario_id: String,
    pub path: String,
    pub message: String,
}

/// Loaded scenario with its origin and lint findings.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub definition: Arc<ScenarioDefinition>,
    pub source: Option<PathBuf>,
    pub issues: Vec<LintIssue>,
}

/// Scenarios keyed by id, sorted by id.
#[derive(Debug, Clone, Default)]
pub struct ScenarioCatalog {
    entries: IndexMap<String, CatalogEntry>,
}

impl ScenarioCatalog {
    /// Load every `*.yaml`, `*.yml`, and `*.json` file directly under `directory`.
    pub fn load_dir(directory: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let directory = directory.as_ref();
        let read_dir = fs::read_dir(directory).map_err(|source| CatalogError::Io {
            path: directory.to_path_buf(),
            source,
        })?;

        let mut files: Vec<PathBuf> = read_dir
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.is_file() && has_scenario_extension(path))
            .collect();
        files.sort();

        let mut loaded = Vec::with_capacity(files.len());
        for path in files {
            let definition = parse_scenario_file(&path).map_err(|error| CatalogError::Parse {
                path: path.clone(),
                reason: format!("{error:#}"),
            })?;
            loaded.push((definition, Some(path)));
        }
        let catalog = Self::build(loaded)?;
        debug!(directory = %directory.display(), scenarios = catalog.len(), "loaded scenario catalog");
        Ok(catalog)
    }

    /// Build a catalog from in-memory definitions.
    pub fn from_definitions(definitions: Vec<ScenarioDefinition>) -> Result<Self, CatalogError> {
        Self::build(definitions.into_iter().map(|definition| (definition, None)).collect())
    }

    fn build(definitions: Vec<(ScenarioDefinition, Option<PathBuf>)>) -> Result<Self, CatalogError> {
        let mut entries: IndexMap<String, CatalogEntry> = IndexMap::new();
        for (definition, source) in definitions {
            if let Some(existing) = entries.get(&definition.id) {
                return Err(CatalogError::DuplicateId {
                    id: definition.id.clone(),
                    first: existing.source.clone().unwrap_or_default(),
                    second: source.unwrap_or_default(),
                });
            }
            let issues = lint_definition(&definition);
            for issue in &issues {
                warn!(scenario = %issue.scenario_id, path = %issue.path, "{}", issue.message);
            }
            entries.insert(
                definition.id.clone(),
                CatalogEntry {
                    definition: Arc::new(definition),
                    source,
                    issues,
                },
            );
        }
        entries.sort_keys();
        Ok(Self { entries })
    }

    pub fn get(&self, id: &str) -> Option<Arc<ScenarioDefinition>> {
        self.entries.get(id).map(|entry| Arc::clone(&entry.definition))
    }

    pub fn entry(&self, id: &str) -> Option<&CatalogEntry> {
        self.entries.get(id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn has_scenario_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| SCENARIO_EXTENSIONS.iter().any(|allowed| extension.eq_ignore_ascii_case(allowed)))
}

/// Parse a single scenario file. `.json` files are parsed as JSON, everything else as YAML.
pub fn parse_scenario_file(file_path: impl AsRef<Path>) -> Result<ScenarioDefinition> {
    let file_path = file_path.as_ref();
    let content = fs::read_to_string(file_path).with_context(|| format!("Failed to read scenario file: {}", file_path.display()))?;

    let is_json = file_path
        .extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extension.eq_ignore_ascii_case("json"));
    let definition: ScenarioDefinition = if is_json {
        serde_json::from_str(&content).with_context(|| format!("Failed to parse JSON scenario: {}", file_path.display()))?
    } else {
        serde_yaml::from_str(&content).with_context(|| format!("Failed to parse YAML scenario: {}", file_path.display()))?
    };

    if definition.id.trim().is_empty() {
        anyhow::bail!("scenario in {} has an empty id", file_path.display());
    }
    Ok(definition)
}

/// Report references to unknown names and conditional groups gated on non-boolean parameters.
pub fn lint_definition(definition: &ScenarioDefinition) -> Vec<LintIssue> {
    let mut known: HashSet<&str> = definition.parameter_schema.keys().map(String::as_str).collect();
    known.extend(definition.computed_variables.iter().map(|computed| computed.name.as_str()));

    let mut references: Vec<TemplateRef> = Vec::new();
    let sections = [
        ("repositories", serde_json::to_value(&definition.repositories)),
        ("environments", serde_json::to_value(&definition.environments)),
        ("applications", serde_json::to_value(&definition.applications)),
        ("flags", serde_json::to_value(&definition.flags)),
        ("computed_variables", serde_json::to_value(&definition.computed_variables)),
    ];
    for (root, value) in sections {
        if let Ok(value) = value {
            collect_references_from_value(&value, root, &mut references);
        }
    }

    let mut issues: Vec<LintIssue> = references
        .into_iter()
        .filter(|reference| !reference.name.starts_with(ENV_PREFIX) && !known.contains(reference.name.as_str()))
        .map(|reference| LintIssue {
            scenario_id: definition.id.clone(),
            path: reference.source_path,
            message: format!("reference '${{{}}}' is neither a parameter nor a computed variable", reference.name),
        })
        .collect();

    for (repository_index, repository) in definition.repositories.iter().enumerate() {
        for (group_index, group) in repository.conditional_operations.iter().enumerate() {
            let path = format!("repositories[{repository_index}].conditional_operations[{group_index}].when");
            let gate = group.when.trim();
            let message = match definition.parameter_schema.get(gate) {
                Some(spec) if spec.r#type == ParameterType::Boolean => continue,
                Some(spec) => format!("gated on '{}', which is a {} parameter", gate, spec.r#type.as_str()),
                None if known.contains(gate) => continue,
                None => format!("gated on unknown parameter '{}'", gate),
            };
            issues.push(LintIssue {
                scenario_id: definition.id.clone(),
                path,
                message,
            });
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const MINIMAL: &str = r#"
id: beta
parameter_schema:
  project_name:
    type: string
  region:
    type: string
repositories:
  - name: "${project_name}"
    source: demo-templates/app
    description: "${owner} in ${env.REGION}"
    conditional_operations:
      - when: region
        when_true: []
"#;

    #[test]
    fn loads_yaml_and_json_sorted_by_id() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.yaml"), MINIMAL).unwrap();
        fs::write(dir.path().join("a.json"), r#"{"id": "zeta", "name": "Zeta"}"#).unwrap();
        fs::write(dir.path().join("alpha.yml"), "id: alpha\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "not a scenario").unwrap();

        let catalog = ScenarioCatalog::load_dir(dir.path()).expect("load catalog");
        let ids: Vec<_> = catalog.entries().map(|entry| entry.definition.id.clone()).collect();
        assert_eq!(ids, vec!["alpha", "beta", "zeta"]);
        assert_eq!(catalog.get("zeta").unwrap().display_name(), "Zeta");
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("one.yaml"), "id: same\n").unwrap();
        fs::write(dir.path().join("two.yaml"), "id: same\n").unwrap();
        let error = ScenarioCatalog::load_dir(dir.path()).unwrap_err();
        assert!(matches!(error, CatalogError::DuplicateId { ref id, .. } if id == "same"));
    }

    #[test]
    fn unparseable_files_name_the_path() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("broken.yaml"), "id: [unterminated").unwrap();
        let error = ScenarioCatalog::load_dir(dir.path()).unwrap_err();
        assert!(error.to_string().contains("broken.yaml"));
    }

    #[test]
    fn lint_flags_unknown_references_and_non_boolean_gates() {
        let definition: ScenarioDefinition = serde_yaml::from_str(MINIMAL).unwrap();
        let issues = lint_definition(&definition);
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].path, "repositories[0].description");
        assert!(issues[0].message.contains("${owner}"));
        assert_eq!(issues[1].path, "repositories[0].conditional_operations[0].when");
        assert!(issues[1].message.contains("string parameter"));

        let catalog = ScenarioCatalog::from_definitions(vec![definition]).unwrap();
        assert_eq!(catalog.entry("beta").unwrap().issues.len(), 2);
    }
}
