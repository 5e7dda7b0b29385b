//! Environment creation with declared variables.

use demoforge_types::{PipelinePhase, ResolvedEnvironment, ResourceKind, ResourceRecord};

use super::{ItemError, ItemOutcome, PhaseReport, PipelineContext, Produced, run_phase};
use crate::error::PlatformError;

const PHASE: PipelinePhase = PipelinePhase::EnvironmentCreation;

pub(super) async fn run(ctx: &PipelineContext) -> PhaseReport {
    let environments: Vec<&ResolvedEnvironment> = ctx.scenario.environments.iter().collect();
    run_phase(ctx, PHASE, environments, |environment| create(ctx, environment)).await
}

async fn create(ctx: &PipelineContext, environment: &ResolvedEnvironment) -> ItemOutcome {
    let mut produced = Vec::new();
    let result = create_inner(ctx, environment, &mut produced).await;
    ItemOutcome::new(environment.name.clone(), produced, result)
}

async fn create_inner(ctx: &PipelineContext, environment: &ResolvedEnvironment, produced: &mut Vec<Produced>) -> Result<(), ItemError> {
    let label = environment.name.as_str();
    let created = ctx
        .platform
        .create_environment(&ctx.org_id, label, environment.description.as_deref())
        .await
        .map_err(|error| PlatformError::from_api(PHASE, label, &error))?;

    let mut record = ResourceRecord::new(ResourceKind::Environment, created.id.clone(), label)
        .with_org(ctx.org_id.clone())
        .with_spec_index(environment.spec_index);
    if let Some(url) = &created.url {
        record = record.with_url(url.clone());
    }
    ctx.record(PHASE, label, record).await?;
    produced.push(Produced {
        kind: ResourceKind::Environment,
        key: label.to_string(),
        id: created.id.clone(),
        url: created.url,
    });

    for variable in &environment.variables {
        ctx.platform
            .set_environment_variable(&ctx.org_id, &created.id, &variable.name, &variable.value, variable.secret)
            .await
            .map_err(|error| PlatformError::from_api(PHASE, label, &error))?;
    }
    Ok(())
}
