//! Static cross-reference check run before any external call.

use std::collections::HashSet;

use demoforge_types::{ResolvedScenario, ResourceKind};

use crate::error::{DependencyError, DependencyReason};

/// Every application component, environment, and repository reference and every flag
/// environment must name something an earlier phase creates.
pub fn check_dependencies(scenario: &ResolvedScenario) -> Result<(), Vec<DependencyError>> {
    let repositories: HashSet<&str> = scenario.repositories.iter().map(|repository| repository.name.as_str()).collect();
    let components: HashSet<&str> = scenario
        .component_repositories()
        .map(|repository| repository.component_name.as_str())
        .collect();
    let environments: HashSet<&str> = scenario.environments.iter().map(|environment| environment.name.as_str()).collect();

    let mut errors = Vec::new();
    for application in &scenario.applications {
        for component in &application.components {
            check(&mut errors, &components, ResourceKind::Application, &application.name, ResourceKind::Component, component);
        }
        for environment in &application.environments {
            check(&mut errors, &environments, ResourceKind::Application, &application.name, ResourceKind::Environment, environment);
        }
        if let Some(repository) = &application.repository {
            check(&mut errors, &repositories, ResourceKind::Application, &application.name, ResourceKind::Repository, repository);
        }
    }
    for flag in &scenario.flags {
        for environment in &flag.environments {
            check(&mut errors, &environments, ResourceKind::Flag, &flag.name, ResourceKind::Environment, environment);
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

fn check(errors: &mut Vec<DependencyError>, known: &HashSet<&str>, owner_kind: ResourceKind, owner: &str, target_kind: ResourceKind, target: &str) {
    if !known.contains(target) {
        errors.push(DependencyError {
            owner_kind,
            owner: owner.to_string(),
            target_kind,
            target: target.to_string(),
            reason: DependencyReason::Undeclared,
        });
    }
}
