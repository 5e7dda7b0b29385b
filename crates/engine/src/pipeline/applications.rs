//! Application creation. Component, environment, and repository references resolve through
//! the run's resource table.

use demoforge_types::{ApplicationSpec, PipelinePhase, ResourceKind, ResourceRecord};

use super::{ItemError, ItemOutcome, PhaseReport, PipelineContext, Produced, ResourceTable, run_phase};
use crate::clients::NewApplication;
use crate::error::PlatformError;

const PHASE: PipelinePhase = PipelinePhase::ApplicationCreation;

pub(super) async fn run(ctx: &PipelineContext, table: &ResourceTable) -> PhaseReport {
    let applications: Vec<(usize, &ApplicationSpec)> = ctx.scenario.applications.iter().enumerate().collect();
    run_phase(ctx, PHASE, applications, |(index, application)| create(ctx, table, index, application)).await
}

async fn create(ctx: &PipelineContext, table: &ResourceTable, index: usize, application: &ApplicationSpec) -> ItemOutcome {
    let mut produced = Vec::new();
    let result = create_inner(ctx, table, index, application, &mut produced).await;
    ItemOutcome::new(application.name.clone(), produced, result)
}

fn resolve_ids(table: &ResourceTable, kind: ResourceKind, names: &[String], owner: &str) -> Result<Vec<String>, ItemError> {
    names
        .iter()
        .map(|name| {
            table
                .require(kind, name, ResourceKind::Application, owner)
                .map(|entry| entry.id.clone())
                .map_err(ItemError::from)
        })
        .collect()
}

async fn create_inner(ctx: &PipelineContext, table: &ResourceTable, index: usize, application: &ApplicationSpec, produced: &mut Vec<Produced>) -> Result<(), ItemError> {
    let label = application.name.as_str();
    let repository_url = match &application.repository {
        Some(repository) => table
            .require(ResourceKind::Repository, repository, ResourceKind::Application, label)?
            .url
            .clone(),
        None => None,
    };
    let request = NewApplication {
        name: application.name.clone(),
        description: application.description.clone(),
        repository_url,
        component_ids: resolve_ids(table, ResourceKind::Component, &application.components, label)?,
        environment_ids: resolve_ids(table, ResourceKind::Environment, &application.environments, label)?,
    };

    let created = ctx
        .platform
        .create_application(&ctx.org_id, &request)
        .await
        .map_err(|error| PlatformError::from_api(PHASE, label, &error))?;

    let mut record = ResourceRecord::new(ResourceKind::Application, created.id.clone(), label)
        .with_org(ctx.org_id.clone())
        .with_spec_index(index);
    if let Some(url) = &created.url {
        record = record.with_url(url.clone());
    }
    ctx.record(PHASE, label, record).await?;
    produced.push(Produced {
        kind: ResourceKind::Application,
        key: label.to_string(),
        id: created.id,
        url: created.url,
    });
    Ok(())
}
