//! Ordered preview of what a run would do, without calling anything.

use demoforge_types::{PipelinePhase, ResolvedScenario, ResourceKind};
use serde::Serialize;

use crate::pipeline::{FM_TOKEN_VARIABLE, repository_target};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PlannedItem {
    /// Kind of resource created, or `None` for configuration-only steps.
    #[serde(rename = "type")]
    pub kind: Option<ResourceKind>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PhasePlan {
    pub phase: PipelinePhase,
    pub items: Vec<PlannedItem>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunPlan {
    pub scenario_id: String,
    pub phases: Vec<PhasePlan>,
}

impl RunPlan {
    /// Number of resources the run would record.
    pub fn resource_count(&self) -> usize {
        self.phases
            .iter()
            .flat_map(|phase| &phase.items)
            .filter(|item| item.kind.is_some())
            .count()
    }
}

fn item(kind: Option<ResourceKind>, name: impl Into<String>, detail: Option<String>) -> PlannedItem {
    PlannedItem {
        kind,
        name: name.into(),
        detail,
    }
}

/// Lay out every phase of `scenario` in execution order.
pub fn plan_run(scenario: &ResolvedScenario, repository_owner: Option<&str>) -> RunPlan {
    let phases = PipelinePhase::ALL
        .into_iter()
        .map(|phase| {
            let items = match phase {
                PipelinePhase::RepositoryCreation => scenario
                    .repositories
                    .iter()
                    .map(|repository| {
                        let name = match repository_target(repository, repository_owner) {
                            Ok((owner, name)) => format!("{owner}/{name}"),
                            Err(_) => repository.name.clone(),
                        };
                        item(Some(ResourceKind::Repository), name, Some(format!("from template {}", repository.source)))
                    })
                    .collect(),
                PipelinePhase::ComponentCreation => scenario
                    .component_repositories()
                    .map(|repository| item(Some(ResourceKind::Component), &repository.component_name, Some(format!("bound to {}", repository.name))))
                    .collect(),
                PipelinePhase::FlagDefinition => scenario
                    .flags
                    .iter()
                    .map(|flag| item(Some(ResourceKind::Flag), &flag.name, Some(flag.flag_type.as_str().to_string())))
                    .collect(),
                PipelinePhase::EnvironmentCreation => scenario
                    .environments
                    .iter()
                    .map(|environment| {
                        let detail = (!environment.variables.is_empty()).then(|| format!("{} variable(s)", environment.variables.len()));
                        item(Some(ResourceKind::Environment), &environment.name, detail)
                    })
                    .collect(),
                PipelinePhase::ApplicationCreation => scenario
                    .applications
                    .iter()
                    .map(|application| item(Some(ResourceKind::Application), &application.name, None))
                    .collect(),
                PipelinePhase::TokenInjection => scenario
                    .environments
                    .iter()
                    .filter(|environment| environment.create_fm_token_var)
                    .map(|environment| item(None, &environment.name, Some(format!("sets {FM_TOKEN_VARIABLE}"))))
                    .collect(),
                PipelinePhase::FlagConfiguration => scenario
                    .flags
                    .iter()
                    .flat_map(|flag| {
                        flag.environments
                            .iter()
                            .map(move |environment| item(None, format!("{}@{}", flag.name, environment), Some("enabled, default off".into())))
                    })
                    .collect(),
            };
            PhasePlan { phase, items }
        })
        .collect();

    RunPlan {
        scenario_id: scenario.scenario_id.clone(),
        phases,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use demoforge_types::{FlagSpec, ResolvedEnvironment, ResolvedRepository};

    #[test]
    fn plan_lists_phases_in_order_with_qualified_repositories() {
        let scenario = ResolvedScenario {
            scenario_id: "demo".into(),
            repositories: vec![ResolvedRepository {
                name: "web".into(),
                source: "templates/web".into(),
                create_component: true,
                component_name: "web".into(),
                ..Default::default()
            }],
            environments: vec![ResolvedEnvironment {
                name: "dev".into(),
                create_fm_token_var: true,
                ..Default::default()
            }],
            applications: vec![],
            flags: vec![FlagSpec {
                name: "checkout".into(),
                environments: vec!["dev".into()],
                ..Default::default()
            }],
        };

        let plan = plan_run(&scenario, Some("acme"));
        let phases: Vec<_> = plan.phases.iter().map(|phase| phase.phase).collect();
        assert_eq!(phases, PipelinePhase::ALL.to_vec());
        assert_eq!(plan.phases[0].items[0].name, "acme/web");
        assert_eq!(plan.phases[6].items[0].name, "checkout@dev");
        assert_eq!(plan.resource_count(), scenario.planned_resource_count());
    }
}
