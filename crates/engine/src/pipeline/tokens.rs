//! Token injection: mint an environment-scoped access key and store it as `FM_TOKEN`.

use demoforge_api::ApiError;
use demoforge_types::{PipelinePhase, ResolvedEnvironment, ResourceKind};
use serde_json::Value as JsonValue;

use super::{FM_TOKEN_VARIABLE, ItemError, ItemOutcome, PhaseReport, PipelineContext, ResourceTable, run_phase};
use crate::error::PlatformError;

const PHASE: PipelinePhase = PipelinePhase::TokenInjection;

pub(super) async fn run(ctx: &PipelineContext, table: &ResourceTable) -> PhaseReport {
    let environments: Vec<&ResolvedEnvironment> = ctx
        .scenario
        .environments
        .iter()
        .filter(|environment| environment.create_fm_token_var)
        .collect();
    run_phase(ctx, PHASE, environments, |environment| inject(ctx, table, environment)).await
}

async fn inject(ctx: &PipelineContext, table: &ResourceTable, environment: &ResolvedEnvironment) -> ItemOutcome {
    let result = inject_inner(ctx, table, environment).await;
    ItemOutcome::new(environment.name.clone(), Vec::new(), result)
}

async fn inject_inner(ctx: &PipelineContext, table: &ResourceTable, environment: &ResolvedEnvironment) -> Result<(), ItemError> {
    let label = environment.name.as_str();
    let environment_id = table
        .require(ResourceKind::Environment, label, ResourceKind::Environment, label)?
        .id
        .clone();
    let api_error = |error: ApiError| PlatformError::from_api(PHASE, label, &error);

    let access_key = ctx.platform.mint_access_key(&ctx.org_id, &environment_id).await.map_err(api_error)?;
    ctx.platform
        .set_environment_variable(&ctx.org_id, &environment_id, FM_TOKEN_VARIABLE, &JsonValue::String(access_key.key), true)
        .await
        .map_err(api_error)?;
    Ok(())
}
