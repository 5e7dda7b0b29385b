//! Drives one scenario run from `pending` to a terminal status.

use demoforge_types::{ProgressEvent, SessionStatus};
use tracing::{error, info};

use crate::pipeline::{PipelineContext, PipelineOutcome, run_pipeline};

/// Run the pipeline for an already created session, finalize it, and close its event stream
/// with `scenario_complete` or `scenario_error`.
pub async fn drive_scenario_run(ctx: PipelineContext) -> PipelineOutcome {
    let session_id = ctx.session_id.clone();

    let outcome = match ctx.ledger.mark_running(&session_id) {
        Ok(_) => run_pipeline(&ctx).await,
        Err(store_error) => {
            error!(session = %session_id, error = %store_error, "failed to start session");
            PipelineOutcome::Aborted {
                reason: store_error.to_string(),
            }
        }
    };

    let status = match &outcome {
        PipelineOutcome::Completed => SessionStatus::Completed,
        PipelineOutcome::Cancelled { .. } => SessionStatus::Cancelled,
        PipelineOutcome::Failed { .. } | PipelineOutcome::Dependency(_) | PipelineOutcome::Aborted { .. } => SessionStatus::Failed,
    };
    let message = outcome.error_message();

    let resources = match ctx.ledger.finalize(&session_id, status, message.clone()) {
        Ok(session) => session.resources,
        Err(store_error) => {
            error!(session = %session_id, error = %store_error, "failed to finalize session");
            ctx.ledger.resources(&session_id).unwrap_or_default()
        }
    };
    info!(session = %session_id, status = status.as_str(), resources = resources.len(), "scenario run finished");

    let event = match message {
        None => ProgressEvent::ScenarioComplete { session_id, resources },
        Some(error) => ProgressEvent::ScenarioError {
            session_id,
            error,
            resources,
        },
    };
    ctx.emitter.emit(event);
    outcome
}
