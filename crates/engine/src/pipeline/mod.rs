//! Provisioning pipeline.
//!
//! Phases run strictly in [`PipelinePhase::ALL`] order. Items inside a phase run concurrently,
//! bounded by the configured limit. A failing item never aborts its siblings: the phase runs
//! to completion, then the pipeline stops if anything failed. Cancellation is observed between
//! phases only.
//!
//! Each item records its resource in the ledger as soon as the creation call succeeds, so a
//! failed run still lists exactly what exists on the platforms.

use std::collections::HashMap;
use std::future::Future;
use std::pin::pin;
use std::sync::Arc;

use demoforge_types::{PipelinePhase, ProgressEvent, ResolvedScenario, ResourceKind, ResourceRecord};
use futures_util::StreamExt;
use futures_util::stream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clients::{Platform, SourceHost};
use crate::error::{DependencyError, DependencyReason, PlatformError};
use crate::events::ProgressEmitter;
use crate::ledger::ResourceLedger;

mod applications;
mod components;
pub mod dependencies;
mod environments;
mod flag_configuration;
mod flags;
mod repositories;
mod tokens;

pub use dependencies::check_dependencies;
pub use repositories::repository_target;

/// Environment variable receiving the minted flag-management access key.
pub const FM_TOKEN_VARIABLE: &str = "FM_TOKEN";

/// Everything a run needs; shared read-only by every item task.
pub struct PipelineContext {
    pub session_id: String,
    pub org_id: String,
    /// Owner for repositories declared without an `owner/` prefix.
    pub repository_owner: Option<String>,
    pub scenario: Arc<ResolvedScenario>,
    pub source_host: Arc<dyn SourceHost>,
    pub platform: Arc<dyn Platform>,
    pub ledger: ResourceLedger,
    pub emitter: Arc<ProgressEmitter>,
    pub concurrency_limit: usize,
    pub cancel: CancellationToken,
}

impl PipelineContext {
    /// Persist a created resource, reporting store failures as an item failure. The store
    /// writes to disk, so the write runs on the blocking pool.
    async fn record(&self, phase: PipelinePhase, label: &str, resource: ResourceRecord) -> Result<(), PlatformError> {
        let ledger = self.ledger.clone();
        let session_id = self.session_id.clone();
        match tokio::task::spawn_blocking(move || ledger.record(&session_id, resource)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(PlatformError::new(phase, label, format!("failed to record resource: {error}"))),
            Err(error) => Err(PlatformError::new(phase, label, format!("resource recording task failed: {error}"))),
        }
    }
}

/// How a pipeline run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Completed,
    /// Items of `phase` failed; later phases did not run.
    Failed { phase: PipelinePhase, failures: Vec<PlatformError> },
    Dependency(DependencyError),
    /// Stopped before `next_phase` started.
    Cancelled { next_phase: PipelinePhase },
    /// The session could not be started.
    Aborted { reason: String },
}

impl PipelineOutcome {
    /// Summary suitable for the session error field and the terminal event.
    pub fn error_message(&self) -> Option<String> {
        match self {
            Self::Completed => None,
            Self::Failed { phase, failures } => Some(format!(
                "{} failed for {} item(s): {}",
                phase,
                failures.len(),
                failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
            )),
            Self::Dependency(error) => Some(error.to_string()),
            Self::Cancelled { next_phase } => Some(format!("run cancelled before {next_phase}")),
            Self::Aborted { reason } => Some(reason.clone()),
        }
    }
}

/// Id and URL of something created earlier in the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TableEntry {
    pub id: String,
    pub url: Option<String>,
}

/// Name to id resolution built while the run progresses. Later phases never re-query the
/// platforms for objects created by earlier ones.
#[derive(Debug, Default)]
pub(crate) struct ResourceTable {
    entries: HashMap<(ResourceKind, String), TableEntry>,
}

impl ResourceTable {
    fn insert(&mut self, produced: Produced) {
        self.entries.insert(
            (produced.kind, produced.key),
            TableEntry {
                id: produced.id,
                url: produced.url,
            },
        );
    }

    pub fn get(&self, kind: ResourceKind, name: &str) -> Option<&TableEntry> {
        self.entries.get(&(kind, name.to_string()))
    }

    /// Look up `target` on behalf of `owner`; absence is a dependency failure.
    pub fn require(&self, target_kind: ResourceKind, target: &str, owner_kind: ResourceKind, owner: &str) -> Result<&TableEntry, DependencyError> {
        self.get(target_kind, target).ok_or_else(|| DependencyError {
            owner_kind,
            owner: owner.to_string(),
            target_kind,
            target: target.to_string(),
            reason: DependencyReason::NotCreated,
        })
    }
}

/// Table entry produced by an item, keyed by its declared name.
#[derive(Debug, Clone)]
pub(crate) struct Produced {
    pub kind: ResourceKind,
    pub key: String,
    pub id: String,
    pub url: Option<String>,
}

#[derive(Debug)]
pub(crate) enum ItemError {
    Platform(PlatformError),
    Dependency(DependencyError),
}

impl From<PlatformError> for ItemError {
    fn from(error: PlatformError) -> Self {
        Self::Platform(error)
    }
}

impl From<DependencyError> for ItemError {
    fn from(error: DependencyError) -> Self {
        Self::Dependency(error)
    }
}

/// Result of one item task.
#[derive(Debug)]
pub(crate) struct ItemOutcome {
    pub label: String,
    pub produced: Vec<Produced>,
    pub error: Option<ItemError>,
}

impl ItemOutcome {
    pub fn new(label: impl Into<String>, produced: Vec<Produced>, result: Result<(), ItemError>) -> Self {
        Self {
            label: label.into(),
            produced,
            error: result.err(),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct PhaseReport {
    produced: Vec<Produced>,
    failures: Vec<PlatformError>,
    dependency: Option<DependencyError>,
}

/// Drive `work` over `items` with bounded concurrency, emitting progress as items finish.
pub(crate) async fn run_phase<I, F, Fut>(ctx: &PipelineContext, phase: PipelinePhase, items: Vec<I>, work: F) -> PhaseReport
where
    F: FnMut(I) -> Fut,
    Fut: Future<Output = ItemOutcome>,
{
    let total = items.len();
    let task_id = phase.as_str().to_string();
    ctx.emitter.emit(ProgressEvent::TaskStart {
        id: task_id.clone(),
        description: phase.description().to_string(),
        total,
    });

    let mut report = PhaseReport::default();
    let pending: Vec<Fut> = items.into_iter().map(work).collect();
    let mut outcomes = pin!(stream::iter(pending).buffer_unordered(ctx.concurrency_limit.max(1)));
    let mut current = 0;
    while let Some(outcome) = outcomes.next().await {
        current += 1;
        let message = match &outcome.error {
            None => outcome.label.clone(),
            Some(ItemError::Platform(error)) => {
                warn!(session = %ctx.session_id, phase = %phase, item = %outcome.label, error = %error.message, "pipeline item failed");
                format!("failed {}: {}", outcome.label, error.message)
            }
            Some(ItemError::Dependency(error)) => {
                warn!(session = %ctx.session_id, phase = %phase, item = %outcome.label, %error, "pipeline item has unmet dependency");
                format!("failed {}: {}", outcome.label, error)
            }
        };
        ctx.emitter.emit(ProgressEvent::TaskProgress {
            id: task_id.clone(),
            current,
            total,
            message,
        });

        report.produced.extend(outcome.produced);
        match outcome.error {
            Some(ItemError::Platform(error)) => report.failures.push(error),
            Some(ItemError::Dependency(error)) => {
                report.dependency.get_or_insert(error);
            }
            None => {}
        }
    }

    if let Some(dependency) = &report.dependency {
        ctx.emitter.emit(ProgressEvent::TaskError {
            id: task_id,
            error: dependency.to_string(),
        });
    } else if report.failures.is_empty() {
        ctx.emitter.emit(ProgressEvent::TaskComplete {
            id: task_id,
            success: true,
            message: format!("{total} item(s) done"),
        });
    } else {
        ctx.emitter.emit(ProgressEvent::TaskError {
            id: task_id,
            error: report.failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "),
        });
    }
    report
}

/// Execute every phase in order against the context's clients.
pub async fn run_pipeline(ctx: &PipelineContext) -> PipelineOutcome {
    let mut table = ResourceTable::default();

    for phase in PipelinePhase::ALL {
        if ctx.cancel.is_cancelled() {
            info!(session = %ctx.session_id, next_phase = %phase, "run cancelled");
            return PipelineOutcome::Cancelled { next_phase: phase };
        }
        info!(session = %ctx.session_id, phase = %phase, "starting phase");

        let report = match phase {
            PipelinePhase::RepositoryCreation => repositories::run(ctx).await,
            PipelinePhase::ComponentCreation => components::run(ctx, &table).await,
            PipelinePhase::FlagDefinition => flags::run(ctx).await,
            PipelinePhase::EnvironmentCreation => environments::run(ctx).await,
            PipelinePhase::ApplicationCreation => applications::run(ctx, &table).await,
            PipelinePhase::TokenInjection => tokens::run(ctx, &table).await,
            PipelinePhase::FlagConfiguration => flag_configuration::run(ctx, &table).await,
        };

        for produced in report.produced {
            table.insert(produced);
        }
        if let Some(dependency) = report.dependency {
            return PipelineOutcome::Dependency(dependency);
        }
        if !report.failures.is_empty() {
            return PipelineOutcome::Failed {
                phase,
                failures: report.failures,
            };
        }
    }
    PipelineOutcome::Completed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_lookup_reports_missing_names() {
        let mut table = ResourceTable::default();
        table.insert(Produced {
            kind: ResourceKind::Environment,
            key: "dev".into(),
            id: "env-1".into(),
            url: None,
        });
        assert_eq!(table.get(ResourceKind::Environment, "dev").map(|entry| entry.id.as_str()), Some("env-1"));

        let error = table
            .require(ResourceKind::Component, "web", ResourceKind::Application, "shop")
            .unwrap_err();
        assert_eq!(error.reason, DependencyReason::NotCreated);
        assert_eq!(error.to_string(), "application 'shop' references component 'web', which was not created in this run");
    }

    #[test]
    fn outcome_messages_summarize_failures() {
        let outcome = PipelineOutcome::Failed {
            phase: PipelinePhase::RepositoryCreation,
            failures: vec![PlatformError::new(PipelinePhase::RepositoryCreation, "acme/b", "HTTP 422")],
        };
        assert_eq!(
            outcome.error_message().as_deref(),
            Some("repository_creation failed for 1 item(s): repository_creation 'acme/b': HTTP 422")
        );
        assert_eq!(PipelineOutcome::Completed.error_message(), None);
    }
}
