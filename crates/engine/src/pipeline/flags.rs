//! Flag definition: registers each flag's name and type. Per-environment configuration
//! happens in the last phase.

use demoforge_types::{FlagSpec, PipelinePhase, ResourceKind, ResourceRecord};

use super::{ItemError, ItemOutcome, PhaseReport, PipelineContext, Produced, run_phase};
use crate::error::PlatformError;

const PHASE: PipelinePhase = PipelinePhase::FlagDefinition;

pub(super) async fn run(ctx: &PipelineContext) -> PhaseReport {
    let flags: Vec<(usize, &FlagSpec)> = ctx.scenario.flags.iter().enumerate().collect();
    run_phase(ctx, PHASE, flags, |(index, flag)| define(ctx, index, flag)).await
}

async fn define(ctx: &PipelineContext, index: usize, flag: &FlagSpec) -> ItemOutcome {
    let mut produced = Vec::new();
    let result = define_inner(ctx, index, flag, &mut produced).await;
    ItemOutcome::new(flag.name.clone(), produced, result)
}

async fn define_inner(ctx: &PipelineContext, index: usize, flag: &FlagSpec, produced: &mut Vec<Produced>) -> Result<(), ItemError> {
    let created = ctx
        .platform
        .create_flag(&ctx.org_id, &flag.name, flag.flag_type, flag.description.as_deref())
        .await
        .map_err(|error| PlatformError::from_api(PHASE, &flag.name, &error))?;

    let mut record = ResourceRecord::new(ResourceKind::Flag, created.id.clone(), flag.name.clone())
        .with_org(ctx.org_id.clone())
        .with_spec_index(index);
    if let Some(url) = &created.url {
        record = record.with_url(url.clone());
    }
    ctx.record(PHASE, &flag.name, record).await?;
    produced.push(Produced {
        kind: ResourceKind::Flag,
        key: flag.name.clone(),
        id: created.id,
        url: created.url,
    });
    Ok(())
}
