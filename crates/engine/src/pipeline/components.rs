//! Component creation for repositories that request one.

use demoforge_types::{PipelinePhase, ResolvedRepository, ResourceKind, ResourceRecord};

use super::{ItemError, ItemOutcome, PhaseReport, PipelineContext, Produced, ResourceTable, run_phase};
use crate::error::PlatformError;

const PHASE: PipelinePhase = PipelinePhase::ComponentCreation;

pub(super) async fn run(ctx: &PipelineContext, table: &ResourceTable) -> PhaseReport {
    let repositories: Vec<&ResolvedRepository> = ctx.scenario.component_repositories().collect();
    run_phase(ctx, PHASE, repositories, |repository| create(ctx, table, repository)).await
}

async fn create(ctx: &PipelineContext, table: &ResourceTable, repository: &ResolvedRepository) -> ItemOutcome {
    let mut produced = Vec::new();
    let result = create_inner(ctx, table, repository, &mut produced).await;
    ItemOutcome::new(repository.component_name.clone(), produced, result)
}

async fn create_inner(ctx: &PipelineContext, table: &ResourceTable, repository: &ResolvedRepository, produced: &mut Vec<Produced>) -> Result<(), ItemError> {
    let label = repository.component_name.as_str();
    let source = table.require(ResourceKind::Repository, &repository.name, ResourceKind::Component, label)?;
    let repository_url = source.url.clone().unwrap_or_default();

    let component = ctx
        .platform
        .create_component(&ctx.org_id, label, &repository_url)
        .await
        .map_err(|error| PlatformError::from_api(PHASE, label, &error))?;

    let mut record = ResourceRecord::new(ResourceKind::Component, component.id.clone(), label)
        .with_org(ctx.org_id.clone())
        .with_spec_index(repository.spec_index);
    if let Some(url) = &component.url {
        record = record.with_url(url.clone());
    }
    ctx.record(PHASE, label, record).await?;
    produced.push(Produced {
        kind: ResourceKind::Component,
        key: label.to_string(),
        id: component.id,
        url: component.url,
    });
    Ok(())
}
