//! # Variable Resolution
//!
//! Turns a [`ScenarioDefinition`] plus caller parameters into a [`ResolvedScenario`].
//!
//! Resolution happens in a fixed order:
//!
//! 1. Parameters are validated against the scenario's schema (defaults applied, form-shaped
//!    values coerced).
//! 2. Computed variables are evaluated in declaration order. A non-empty source variable is
//!    taken verbatim; otherwise the fallback template is expanded against everything resolved
//!    so far.
//! 3. The environment namespace is filled with the selected target's properties and the
//!    built-ins `env.UNIFY_API` and `env.ENDPOINT_ID`.
//! 4. Every string leaf of the repository, environment, application, and flag declarations
//!    is substituted.
//! 5. Boolean- and number-typed positions are converted from their rendered text, and
//!    conditional file operations are narrowed to the selected branch.
//!
//! Errors from steps 2, 4, and 5 are collected with the field path they occurred at and
//! returned together.
//!
//! ```rust
//! use demoforge_engine::resolve::build_context;
//! use demoforge_util::EnvironmentTarget;
//! use serde_json::{Map, json};
//!
//! let mut parameters = Map::new();
//! parameters.insert("project_name".into(), json!("shop"));
//! let target = EnvironmentTarget { unify_api: "https://api.unify.io".into(), ..Default::default() };
//!
//! let context = build_context(&parameters, &[], &target).unwrap();
//! assert_eq!(context.render("${project_name} on ${env.UNIFY_API}", "name").unwrap(), "shop on https://api.unify.io");
//! ```

use demoforge_types::scenario::{parse_bool_text, parse_number_text};
use demoforge_types::{
    ComputedVariable, ConditionalFileOperations, EnvironmentSpec, EnvironmentVariable, FileOperation, ParameterType, RepositorySpec,
    ResolvedEnvironment, ResolvedRepository, ResolvedScenario, ScenarioDefinition, Templated, validate_parameters,
};
use demoforge_util::EnvironmentTarget;
use indexmap::IndexMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map as JsonMap, Value};

use crate::error::{EngineError, ResolutionError};
use crate::templates::{ENV_PREFIX, TemplateSegment, TemplateSyntaxError, join_path, parse_template};

/// Built-in environment property holding the platform API base URL.
pub const UNIFY_API_PROPERTY: &str = "UNIFY_API";
/// Built-in environment property holding the flag-evaluation endpoint id.
pub const ENDPOINT_ID_PROPERTY: &str = "ENDPOINT_ID";

/// Immutable substitution context for one run.
///
/// Bare names and `env.` names live in separate maps, so a parameter called `REGION` and
/// the property `env.REGION` never collide.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableContext {
    variables: IndexMap<String, String>,
    environment: IndexMap<String, String>,
}

impl VariableContext {
    /// Look up a reference as written inside `${...}`.
    pub fn lookup(&self, reference: &str) -> Option<&str> {
        match reference.strip_prefix(ENV_PREFIX) {
            Some(property) => self.environment.get(property).map(String::as_str),
            None => self.variables.get(reference).map(String::as_str),
        }
    }

    pub fn variables(&self) -> &IndexMap<String, String> {
        &self.variables
    }

    pub fn environment(&self) -> &IndexMap<String, String> {
        &self.environment
    }

    /// Substitute every reference in `text`, failing on the first problem.
    pub fn render(&self, text: &str, path: &str) -> Result<String, ResolutionError> {
        let mut errors = Vec::new();
        match self.render_into(text, path, &mut errors) {
            Some(rendered) => Ok(rendered),
            None => Err(errors.remove(0)),
        }
    }

    /// Substitute every reference in `text`, pushing one error per problem. Returns `None`
    /// when anything failed.
    fn render_into(&self, text: &str, path: &str, errors: &mut Vec<ResolutionError>) -> Option<String> {
        let segments = match parse_template(text) {
            Ok(segments) => segments,
            Err(error) => {
                errors.push(syntax_error(error, path, text));
                return None;
            }
        };

        let mut rendered = String::with_capacity(text.len());
        let mut failed = false;
        for segment in segments {
            match segment {
                TemplateSegment::Literal(literal) => rendered.push_str(literal),
                TemplateSegment::Reference(name) => match self.lookup(name) {
                    Some(value) => rendered.push_str(value),
                    None => {
                        failed = true;
                        errors.push(ResolutionError::Unresolved {
                            path: path.to_string(),
                            name: name.to_string(),
                        });
                    }
                },
            }
        }
        (!failed).then_some(rendered)
    }
}

fn syntax_error(error: TemplateSyntaxError, path: &str, text: &str) -> ResolutionError {
    match error {
        TemplateSyntaxError::Unterminated { .. } => ResolutionError::Unterminated {
            path: path.to_string(),
            text: text.to_string(),
        },
        TemplateSyntaxError::EmptyReference { .. } => ResolutionError::EmptyReference { path: path.to_string() },
    }
}

/// Text form of a parameter value as it appears when substituted.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Build the variable context from validated parameters, computed variables, and the
/// selected environment target.
pub fn build_context(
    parameters: &JsonMap<String, Value>,
    computed_variables: &[ComputedVariable],
    target: &EnvironmentTarget,
) -> Result<VariableContext, Vec<ResolutionError>> {
    let mut context = VariableContext::default();
    for (name, value) in parameters {
        context.variables.insert(name.clone(), value_to_text(value));
    }

    for (name, value) in &target.properties {
        context.environment.insert(name.clone(), value.clone());
    }
    context.environment.insert(UNIFY_API_PROPERTY.to_string(), target.unify_api.clone());
    context.environment.insert(ENDPOINT_ID_PROPERTY.to_string(), target.endpoint_id.clone());

    let mut errors = Vec::new();
    for (index, computed) in computed_variables.iter().enumerate() {
        let source_value = computed
            .source
            .as_deref()
            .filter(|source| !source.trim().is_empty())
            .and_then(|source| context.variables.get(source))
            .filter(|value| !value.is_empty())
            .cloned();
        if let Some(value) = source_value {
            context.variables.insert(computed.name.clone(), value);
            continue;
        }

        let path = format!("computed_variables[{index}].fallback");
        let later_names: Vec<&str> = computed_variables[index..].iter().map(|later| later.name.as_str()).collect();
        if let Some(value) = render_fallback(&context, &computed.name, &computed.fallback, &path, &later_names, &mut errors) {
            context.variables.insert(computed.name.clone(), value);
        }
    }

    if errors.is_empty() { Ok(context) } else { Err(errors) }
}

fn render_fallback(
    context: &VariableContext,
    name: &str,
    fallback: &str,
    path: &str,
    later_names: &[&str],
    errors: &mut Vec<ResolutionError>,
) -> Option<String> {
    let segments = match parse_template(fallback) {
        Ok(segments) => segments,
        Err(error) => {
            errors.push(syntax_error(error, path, fallback));
            return None;
        }
    };

    let mut rendered = String::new();
    let mut failed = false;
    for segment in segments {
        match segment {
            TemplateSegment::Literal(literal) => rendered.push_str(literal),
            TemplateSegment::Reference(reference) => match context.lookup(reference) {
                Some(value) => rendered.push_str(value),
                None if later_names.contains(&reference) => {
                    failed = true;
                    errors.push(ResolutionError::ForwardReference {
                        path: path.to_string(),
                        name: name.to_string(),
                        reference: reference.to_string(),
                    });
                }
                None => {
                    failed = true;
                    errors.push(ResolutionError::Unresolved {
                        path: path.to_string(),
                        name: reference.to_string(),
                    });
                }
            },
        }
    }
    (!failed).then_some(rendered)
}

/// Validate parameters and resolve a definition into a concrete scenario instance.
pub fn resolve_scenario(
    definition: &ScenarioDefinition,
    parameters: &JsonMap<String, Value>,
    target: &EnvironmentTarget,
) -> Result<ResolvedScenario, EngineError> {
    let validated = validate_parameters(&definition.parameter_schema, parameters).map_err(EngineError::InvalidParameters)?;
    let context = build_context(&validated, &definition.computed_variables, target).map_err(EngineError::Resolution)?;
    substitute_definition(definition, &context).map_err(EngineError::Resolution)
}

/// Substitute and convert every declaration of `definition` against `context`.
pub fn substitute_definition(definition: &ScenarioDefinition, context: &VariableContext) -> Result<ResolvedScenario, Vec<ResolutionError>> {
    let mut errors = Vec::new();

    let repositories: Vec<RepositorySpec> = substitute_section(&definition.repositories, "repositories", context, &mut errors);
    let environments: Vec<EnvironmentSpec> = substitute_section(&definition.environments, "environments", context, &mut errors);
    let applications = substitute_section(&definition.applications, "applications", context, &mut errors);
    let flags = substitute_section(&definition.flags, "flags", context, &mut errors);

    let repositories = repositories
        .into_iter()
        .enumerate()
        .map(|(index, repository)| convert_repository(index, repository, context, &mut errors))
        .collect();
    let environments = environments
        .into_iter()
        .enumerate()
        .map(|(index, environment)| convert_environment(index, environment, &mut errors))
        .collect();

    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(ResolvedScenario {
        scenario_id: definition.id.clone(),
        repositories,
        environments,
        applications,
        flags,
    })
}

fn substitute_section<T: Serialize + DeserializeOwned>(items: &[T], root: &str, context: &VariableContext, errors: &mut Vec<ResolutionError>) -> Vec<T> {
    let conversion_error = |reason: String| ResolutionError::Conversion {
        path: root.to_string(),
        expected: "a valid declaration",
        found: reason,
    };
    let value = match serde_json::to_value(items) {
        Ok(value) => value,
        Err(error) => {
            errors.push(conversion_error(error.to_string()));
            return Vec::new();
        }
    };
    let substituted = substitute_value(&value, root, context, errors);
    match serde_json::from_value(substituted) {
        Ok(items) => items,
        Err(error) => {
            errors.push(conversion_error(error.to_string()));
            Vec::new()
        }
    }
}

/// Recursively substitute every string leaf. Strings that fail keep their original text.
pub fn substitute_value(value: &Value, path: &str, context: &VariableContext, errors: &mut Vec<ResolutionError>) -> Value {
    match value {
        Value::String(text) => Value::String(context.render_into(text, path, errors).unwrap_or_else(|| text.clone())),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(index, item)| substitute_value(item, &format!("{path}[{index}]"), context, errors))
                .collect(),
        ),
        Value::Object(map) => {
            let mut substituted = JsonMap::new();
            for (key, nested) in map {
                substituted.insert(key.clone(), substitute_value(nested, &join_path(path, key), context, errors));
            }
            Value::Object(substituted)
        }
        _ => value.clone(),
    }
}

fn convert_repository(index: usize, repository: RepositorySpec, context: &VariableContext, errors: &mut Vec<ResolutionError>) -> ResolvedRepository {
    let path = format!("repositories[{index}]");
    let private = coerce_bool(&repository.private, &join_path(&path, "private"), errors);
    let create_component = coerce_bool(&repository.create_component, &join_path(&path, "create_component"), errors);
    let file_operations = select_operations(&repository.conditional_operations, &path, context, errors);
    let component_name = repository
        .component_name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| repository.name.clone());

    ResolvedRepository {
        spec_index: index,
        name: repository.name,
        source: repository.source,
        description: repository.description,
        private,
        create_component,
        component_name,
        replacements: repository.replacements,
        file_operations,
        secrets: repository.secrets,
    }
}

fn convert_environment(index: usize, environment: EnvironmentSpec, errors: &mut Vec<ResolutionError>) -> ResolvedEnvironment {
    let path = format!("environments[{index}]");
    let create_fm_token_var = coerce_bool(&environment.create_fm_token_var, &join_path(&path, "create_fm_token_var"), errors);
    let variables = environment
        .variables
        .into_iter()
        .enumerate()
        .map(|(variable_index, variable)| {
            let value_path = format!("{path}.variables[{variable_index}].value");
            let value = match variable.value_type {
                Some(value_type) => convert_typed_value(variable.value, value_type, &value_path, errors),
                None => variable.value,
            };
            EnvironmentVariable {
                name: variable.name,
                value,
                secret: variable.secret,
            }
        })
        .collect();

    ResolvedEnvironment {
        spec_index: index,
        name: environment.name,
        description: environment.description,
        variables,
        create_fm_token_var,
    }
}

fn coerce_bool(value: &Templated<bool>, path: &str, errors: &mut Vec<ResolutionError>) -> bool {
    match value.coerce() {
        Ok(flag) => flag,
        Err(conversion) => {
            errors.push(ResolutionError::Conversion {
                path: path.to_string(),
                expected: conversion.expected,
                found: conversion.found,
            });
            false
        }
    }
}

/// Convert a rendered value into its declared type.
fn convert_typed_value(value: Value, value_type: ParameterType, path: &str, errors: &mut Vec<ResolutionError>) -> Value {
    let converted = match (&value, value_type) {
        (Value::Bool(_), ParameterType::Boolean) | (Value::Number(_), ParameterType::Number) | (Value::String(_), ParameterType::String) => {
            Some(value.clone())
        }
        (Value::String(text), ParameterType::Boolean) => parse_bool_text(text).map(Value::Bool),
        (Value::String(text), ParameterType::Number) => parse_number_text(text),
        (Value::Bool(_) | Value::Number(_), ParameterType::String) => Some(Value::String(value.to_string())),
        _ => None,
    };
    converted.unwrap_or_else(|| {
        errors.push(ResolutionError::Conversion {
            path: path.to_string(),
            expected: value_type.as_str(),
            found: value_to_text(&value),
        });
        value
    })
}

/// Pick `when_true` or `when_false` of each group according to its gating variable.
fn select_operations(
    groups: &[ConditionalFileOperations],
    repository_path: &str,
    context: &VariableContext,
    errors: &mut Vec<ResolutionError>,
) -> Vec<FileOperation> {
    let mut selected = Vec::new();
    for (index, group) in groups.iter().enumerate() {
        let path = format!("{repository_path}.conditional_operations[{index}].when");
        let gate = group.when.trim();
        let Some(text) = context.lookup(gate) else {
            errors.push(ResolutionError::Unresolved {
                path,
                name: gate.to_string(),
            });
            continue;
        };
        match parse_bool_text(text) {
            Some(true) => selected.extend(group.when_true.iter().cloned()),
            Some(false) => selected.extend(group.when_false.iter().cloned()),
            None => errors.push(ResolutionError::NonBooleanCondition {
                path,
                name: gate.to_string(),
                found: text.to_string(),
            }),
        }
    }
    selected
}
