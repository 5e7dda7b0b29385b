//! Flag configuration: every flag is enabled in each listed environment with its type's
//! "off" default and no targeting conditions.

use demoforge_types::{FlagSpec, FlagType, PipelinePhase, ResourceKind};
use serde_json::Value as JsonValue;

use super::{ItemError, ItemOutcome, PhaseReport, PipelineContext, ResourceTable, run_phase};
use crate::error::PlatformError;

const PHASE: PipelinePhase = PipelinePhase::FlagConfiguration;

/// Default value served by a freshly configured flag.
pub fn off_value(flag_type: FlagType) -> JsonValue {
    match flag_type {
        FlagType::Boolean => JsonValue::Bool(false),
        FlagType::String => JsonValue::String(String::new()),
        FlagType::Number => JsonValue::from(0),
    }
}

pub(super) async fn run(ctx: &PipelineContext, table: &ResourceTable) -> PhaseReport {
    let pairs: Vec<(&FlagSpec, &str)> = ctx
        .scenario
        .flags
        .iter()
        .flat_map(|flag| flag.environments.iter().map(move |environment| (flag, environment.as_str())))
        .collect();
    run_phase(ctx, PHASE, pairs, |(flag, environment)| configure(ctx, table, flag, environment)).await
}

async fn configure(ctx: &PipelineContext, table: &ResourceTable, flag: &FlagSpec, environment: &str) -> ItemOutcome {
    let label = format!("{}@{}", flag.name, environment);
    let result = configure_inner(ctx, table, flag, environment, &label).await;
    ItemOutcome::new(label, Vec::new(), result)
}

async fn configure_inner(ctx: &PipelineContext, table: &ResourceTable, flag: &FlagSpec, environment: &str, label: &str) -> Result<(), ItemError> {
    let flag_id = table.require(ResourceKind::Flag, &flag.name, ResourceKind::Flag, &flag.name)?.id.clone();
    let environment_id = table
        .require(ResourceKind::Environment, environment, ResourceKind::Flag, &flag.name)?
        .id
        .clone();
    ctx.platform
        .set_flag_configuration(&ctx.org_id, &flag_id, &environment_id, true, &off_value(flag.flag_type))
        .await
        .map_err(|error| PlatformError::from_api(PHASE, label, &error))?;
    Ok(())
}
