//! # Demoforge Engine
//!
//! Resolves parameterized scenario definitions into concrete instances and provisions them
//! across the source host and the Unify platform, tracking every created resource in a
//! durable session so it can be cleaned up later.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use demoforge_engine::clients::{NoopPlatform, NoopSourceHost};
//! use demoforge_engine::{EngineSettings, RunRequest, ScenarioCatalog, ScenarioEngine};
//! use demoforge_util::InMemorySessionStore;
//!
//! let definition = serde_yaml::from_str(r#"
//! id: hello
//! repositories:
//!   - name: hello-web
//!     source: templates/web
//! "#)?;
//! let catalog = ScenarioCatalog::from_definitions(vec![definition])?;
//! let engine = ScenarioEngine::new(
//!     catalog,
//!     Arc::new(NoopSourceHost::new()),
//!     Arc::new(NoopPlatform),
//!     Arc::new(InMemorySessionStore::new()),
//!     EngineSettings::default(),
//! );
//!
//! let plan = engine.plan(&RunRequest::new("hello", "org-1"))?;
//! assert_eq!(plan.resource_count(), 1);
//! assert_eq!(plan.phases[0].items[0].name, "templates/hello-web");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`catalog`**: loads and lints scenario definitions
//! - **`resolve`**: parameter validation, variable context, and template substitution
//! - **`pipeline`**: the seven provisioning phases with bounded per-phase concurrency
//! - **`ledger`**: session lifecycle on top of the session store
//! - **`events`**: per-session progress fan-out
//! - **`cleanup`**: reverse-order teardown of a session's resources
//! - **`preflight`** / **`plan`**: advisory checks and previews that never mutate anything

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use demoforge_types::{ResolvedScenario, Session, SessionFilter};
use demoforge_util::config::{DEFAULT_CONCURRENCY_LIMIT, DEFAULT_TTL_DAYS};
use demoforge_util::{DemoforgeConfig, EnvironmentTarget, InMemorySessionStore, SessionStore};
use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub mod catalog;
pub mod cleanup;
pub mod clients;
pub mod error;
pub mod events;
pub mod ledger;
pub mod pipeline;
pub mod plan;
pub mod preflight;
pub mod resolve;
pub mod run;
pub mod templates;

#[cfg(test)]
mod testing;

pub use catalog::{CatalogError, ScenarioCatalog, parse_scenario_file};
pub use cleanup::{CleanupReport, CleanupResult, CleanupStatus};
pub use clients::{NoopPlatform, NoopSourceHost, Platform, SourceHost};
pub use error::{DependencyError, EngineError, PlatformError, ResolutionError};
pub use events::{EventHub, EventStream, ProgressEmitter};
pub use ledger::ResourceLedger;
pub use pipeline::{PipelineContext, PipelineOutcome};
pub use plan::RunPlan;
pub use preflight::PreflightReport;
pub use resolve::resolve_scenario;
pub use run::drive_scenario_run;

/// Engine-wide knobs, usually taken from the configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub concurrency_limit: usize,
    /// Expiry applied when a run request does not specify one.
    pub default_ttl_days: u32,
    /// Owner for repositories declared without one.
    pub repository_owner: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            default_ttl_days: DEFAULT_TTL_DAYS,
            repository_owner: None,
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &DemoforgeConfig) -> Self {
        Self {
            concurrency_limit: config.concurrency_limit(),
            default_ttl_days: config.default_ttl_days,
            repository_owner: config.github_owner.clone(),
        }
    }
}

/// Everything a caller supplies to start (or plan) a run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub scenario_id: String,
    pub org_id: String,
    pub parameters: JsonMap<String, Value>,
    /// Name of the selected environment target, stored on the session.
    pub environment_name: Option<String>,
    pub environment: EnvironmentTarget,
    pub ttl_days: Option<u32>,
    pub dry_run: bool,
    pub repository_owner: Option<String>,
}

impl RunRequest {
    pub fn new(scenario_id: impl Into<String>, org_id: impl Into<String>) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            org_id: org_id.into(),
            ..Default::default()
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }
}

/// A started run.
pub struct RunHandle {
    pub session_id: String,
    /// Subscribed before the run started, so it sees every event.
    pub events: EventStream,
    pub task: JoinHandle<PipelineOutcome>,
    pub cancel: CancellationToken,
}

/// Entry point tying the catalog, clients, ledger, and event hub together.
pub struct ScenarioEngine {
    catalog: ScenarioCatalog,
    source_host: Arc<dyn SourceHost>,
    platform: Arc<dyn Platform>,
    ledger: ResourceLedger,
    dry_run_ledger: ResourceLedger,
    hub: Arc<EventHub>,
    settings: EngineSettings,
    active_runs: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl ScenarioEngine {
    pub fn new(
        catalog: ScenarioCatalog,
        source_host: Arc<dyn SourceHost>,
        platform: Arc<dyn Platform>,
        store: Arc<dyn SessionStore>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            catalog,
            source_host,
            platform,
            ledger: ResourceLedger::new(store),
            dry_run_ledger: ResourceLedger::new(Arc::new(InMemorySessionStore::new())),
            hub: Arc::new(EventHub::new()),
            settings,
            active_runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn catalog(&self) -> &ScenarioCatalog {
        &self.catalog
    }

    /// Validate, resolve, and dependency-check a request without touching anything.
    pub fn resolve(&self, request: &RunRequest) -> Result<ResolvedScenario, EngineError> {
        let definition = self
            .catalog
            .get(&request.scenario_id)
            .ok_or_else(|| EngineError::UnknownScenario(request.scenario_id.clone()))?;
        let resolved = resolve_scenario(&definition, &request.parameters, &request.environment)?;
        pipeline::check_dependencies(&resolved).map_err(EngineError::Dependencies)?;
        Ok(resolved)
    }

    pub fn plan(&self, request: &RunRequest) -> Result<RunPlan, EngineError> {
        let resolved = self.resolve(request)?;
        Ok(plan::plan_run(&resolved, self.repository_owner(request)))
    }

    /// Start a run on the current tokio runtime.
    ///
    /// Validation and dependency errors are returned before any session is created. On
    /// success the returned stream already observes the run.
    pub fn run(&self, request: RunRequest) -> Result<RunHandle, EngineError> {
        self.run_with_cancellation(request, CancellationToken::new())
    }

    /// Like [`ScenarioEngine::run`], observing a caller-owned cancellation token.
    pub fn run_with_cancellation(&self, request: RunRequest, cancel: CancellationToken) -> Result<RunHandle, EngineError> {
        let resolved = self.resolve(&request)?;

        let (ledger, source_host, platform): (ResourceLedger, Arc<dyn SourceHost>, Arc<dyn Platform>) = if request.dry_run {
            (self.dry_run_ledger.clone(), Arc::new(NoopSourceHost::new()), Arc::new(NoopPlatform))
        } else {
            (self.ledger.clone(), Arc::clone(&self.source_host), Arc::clone(&self.platform))
        };

        let ttl_days = request.ttl_days.unwrap_or(self.settings.default_ttl_days);
        let session = ledger.begin(&request.scenario_id, &request.org_id, request.environment_name.as_deref(), Some(ttl_days))?;
        let emitter = self.hub.open(&session.id);
        let events = emitter.subscribe();
        info!(
            session = %session.id,
            scenario = %request.scenario_id,
            org = %request.org_id,
            dry_run = request.dry_run,
            "starting scenario run"
        );

        let ctx = PipelineContext {
            session_id: session.id.clone(),
            org_id: request.org_id.clone(),
            repository_owner: self.repository_owner(&request).map(str::to_string),
            scenario: Arc::new(resolved),
            source_host,
            platform,
            ledger,
            emitter,
            concurrency_limit: self.settings.concurrency_limit.max(1),
            cancel: cancel.clone(),
        };

        self.active_runs
            .lock()
            .expect("active runs lock poisoned")
            .insert(session.id.clone(), cancel.clone());
        let active_runs = Arc::clone(&self.active_runs);
        let session_id = session.id.clone();
        let task = tokio::spawn(async move {
            let outcome = drive_scenario_run(ctx).await;
            active_runs.lock().expect("active runs lock poisoned").remove(&session_id);
            outcome
        });

        Ok(RunHandle {
            session_id: session.id,
            events,
            task,
            cancel,
        })
    }

    /// Events of a run started by this engine. Finished or unknown sessions yield an ended
    /// stream.
    pub fn subscribe(&self, session_id: &str) -> EventStream {
        self.hub.subscribe(session_id)
    }

    /// Request cancellation of a running session. Returns `false` when it is not running here.
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.active_runs.lock().expect("active runs lock poisoned").get(session_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn session(&self, session_id: &str) -> Result<Option<Session>, EngineError> {
        if let Some(session) = self.ledger.get(session_id)? {
            return Ok(Some(session));
        }
        Ok(self.dry_run_ledger.get(session_id)?)
    }

    pub fn sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>, EngineError> {
        Ok(self.ledger.list(filter)?)
    }

    /// Delete a finished session's resources in reverse creation order.
    pub async fn cleanup(&self, session_id: &str, dry_run: bool) -> Result<CleanupReport, EngineError> {
        if self.ledger.get(session_id)?.is_some() {
            return cleanup::cleanup_session(&self.ledger, self.source_host.as_ref(), self.platform.as_ref(), session_id, dry_run).await;
        }
        if self.dry_run_ledger.get(session_id)?.is_some() {
            return cleanup::cleanup_session(&self.dry_run_ledger, &NoopSourceHost::new(), &NoopPlatform, session_id, dry_run).await;
        }
        Err(EngineError::SessionNotFound(session_id.to_string()))
    }

    /// Clean up every expired, finished session that still has live resources.
    pub async fn cleanup_expired(&self, dry_run: bool) -> Result<Vec<CleanupReport>, EngineError> {
        let expired = self.ledger.list(&SessionFilter::expired())?;
        let mut reports = Vec::new();
        for session in expired {
            if !session.status.is_terminal() || session.live_resources().next().is_none() {
                continue;
            }
            match self.cleanup(&session.id, dry_run).await {
                Ok(report) => reports.push(report),
                Err(error) => warn!(session = %session.id, %error, "expired session cleanup failed"),
            }
        }
        Ok(reports)
    }

    /// Report which organization properties and secrets the scenario expects but are missing.
    pub async fn preflight(&self, scenario_id: &str, org_id: &str) -> Result<PreflightReport, EngineError> {
        let definition = self
            .catalog
            .get(scenario_id)
            .ok_or_else(|| EngineError::UnknownScenario(scenario_id.to_string()))?;
        Ok(preflight::check_preflight(self.platform.as_ref(), org_id, &definition.required_properties, &definition.required_secrets).await?)
    }

    /// Create missing items of a pre-flight report from the supplied values.
    pub async fn create_properties(&self, report: &PreflightReport, values: &IndexMap<String, String>) -> Result<Vec<String>, EngineError> {
        Ok(preflight::create_missing(self.platform.as_ref(), report, values).await?)
    }

    fn repository_owner<'a>(&'a self, request: &'a RunRequest) -> Option<&'a str> {
        request
            .repository_owner
            .as_deref()
            .or(self.settings.repository_owner.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakePlatform, FakeSourceHost};
    use demoforge_types::{ProgressEvent, ResourceKind, ResourceRecord, ScenarioDefinition, SessionStatus};
    use serde_json::json;

    const SHOP_SCENARIO: &str = r#"
id: shop-demo
name: Shop Demo
parameter_schema:
  project_name:
    type: string
    pattern: "^[a-z0-9-]+$"
    required: true
  use_vpc:
    type: boolean
    default: false
required_properties: [UNIFY_API]
required_secrets: [NPM_TOKEN]
repositories:
  - name: "${project_name}-web"
    source: demo-templates/web
    create_component: true
    replacements:
      - path: README.md
        values:
          "__PROJECT__": "${project_name}"
          "__ENDPOINT__": "${env.ENDPOINT_ID}"
    conditional_operations:
      - when: use_vpc
        when_true:
          - action: move
            from: infra/vpc.tf
            to: main.tf
        when_false:
          - action: delete
            path: infra
    secrets:
      - name: UNIFY_ENDPOINT
        value: "${env.ENDPOINT_ID}"
environments:
  - name: dev
    create_fm_token_var: true
    variables:
      - name: USE_VPC
        value: "${use_vpc}"
        type: boolean
applications:
  - name: "${project_name}"
    repository: "${project_name}-web"
    components: ["${project_name}-web"]
    environments: [dev]
flags:
  - name: new-checkout
    environments: [dev]
"#;

    const TRIO_SCENARIO: &str = r#"
id: trio
repositories:
  - name: one
    source: demo-templates/app
  - name: two
    source: demo-templates/app
  - name: three
    source: demo-templates/app
"#;

    struct Harness {
        engine: ScenarioEngine,
        host: Arc<FakeSourceHost>,
        platform: Arc<FakePlatform>,
    }

    fn harness(host: FakeSourceHost, platform: FakePlatform, concurrency_limit: usize) -> Harness {
        let definitions: Vec<ScenarioDefinition> = [SHOP_SCENARIO, TRIO_SCENARIO]
            .iter()
            .map(|text| serde_yaml::from_str(text).expect("scenario yaml"))
            .collect();
        let catalog = ScenarioCatalog::from_definitions(definitions).expect("catalog");
        let host = Arc::new(host);
        let platform = Arc::new(platform);
        let engine = ScenarioEngine::new(
            catalog,
            Arc::clone(&host) as Arc<dyn SourceHost>,
            Arc::clone(&platform) as Arc<dyn Platform>,
            Arc::new(InMemorySessionStore::new()),
            EngineSettings {
                concurrency_limit,
                default_ttl_days: 7,
                repository_owner: Some("acme".into()),
            },
        );
        Harness { engine, host, platform }
    }

    fn shop_request() -> RunRequest {
        let mut request = RunRequest::new("shop-demo", "org-1").with_parameter("project_name", "shop");
        request.environment = EnvironmentTarget {
            unify_api: "https://api.unify.test".into(),
            endpoint_id: "ep-42".into(),
            properties: IndexMap::new(),
        };
        request.environment_name = Some("production".into());
        request
    }

    async fn drain(mut events: EventStream) -> Vec<ProgressEvent> {
        let mut collected = Vec::new();
        while let Some(event) = events.next().await {
            collected.push(event);
        }
        collected
    }

    fn kinds(resources: &[ResourceRecord]) -> Vec<ResourceKind> {
        resources.iter().map(|resource| resource.kind).collect()
    }

    #[tokio::test]
    async fn run_provisions_every_phase_in_order() {
        let host = FakeSourceHost::new()
            .with_file("acme/shop-web", "README.md", "# __PROJECT__ (__ENDPOINT__)")
            .with_file("acme/shop-web", "infra/vpc.tf", "vpc {}")
            .with_file("acme/shop-web", "infra/vars.tf", "vars {}");
        let Harness { engine, host, platform } = harness(host, FakePlatform::new(), 4);

        let handle = engine.run(shop_request()).expect("run starts");
        let session_id = handle.session_id.clone();
        let events = drain(handle.events).await;
        assert_eq!(handle.task.await.unwrap(), PipelineOutcome::Completed);

        let session = engine.session(&session_id).unwrap().expect("session");
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.environment.as_deref(), Some("production"));
        assert!(session.expires_at.is_some());
        assert_eq!(
            kinds(&session.resources),
            vec![
                ResourceKind::Repository,
                ResourceKind::Component,
                ResourceKind::Flag,
                ResourceKind::Environment,
                ResourceKind::Application
            ]
        );
        assert_eq!(session.resources[0].name, "acme/shop-web");
        assert!(!session.resources[0].existed);

        assert_eq!(host.file("acme/shop-web", "README.md").as_deref(), Some("# shop (ep-42)"));
        assert_eq!(host.file("acme/shop-web", "infra/vpc.tf"), None);
        assert_eq!(host.file("acme/shop-web", "infra/vars.tf"), None);
        assert_eq!(host.secrets(), vec![("acme/shop-web".to_string(), "UNIFY_ENDPOINT".to_string())]);

        let variables = platform.variables();
        assert!(variables.iter().any(|(_, name, value, secret)| name == "USE_VPC" && *value == json!(false) && !secret));
        assert!(variables.iter().any(|(_, name, value, secret)| name == "FM_TOKEN" && value.is_string() && *secret));

        let applications = platform.applications();
        assert_eq!(applications[0].name, "shop");
        assert_eq!(applications[0].component_ids.len(), 1);
        assert_eq!(applications[0].repository_url.as_deref(), Some("https://github.test/acme/shop-web"));
        assert!(platform.flag_configurations()[0].2);
        assert_eq!(platform.flag_configurations()[0].3, json!(false));

        let starts: Vec<&str> = events
            .iter()
            .filter_map(|event| match event {
                ProgressEvent::TaskStart { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(starts.len(), 7);
        assert_eq!(starts[0], "repository_creation");
        assert_eq!(starts[6], "flag_configuration");
        match events.last() {
            Some(ProgressEvent::ScenarioComplete { resources, .. }) => assert_eq!(resources.len(), 5),
            other => panic!("unexpected terminal event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_run_adopts_the_existing_repository() {
        let Harness { engine, host, .. } = harness(FakeSourceHost::new(), FakePlatform::new(), 4);

        let first = engine.run(RunRequest::new("trio", "org-1")).unwrap();
        drain(first.events).await;
        first.task.await.unwrap();
        let second = engine.run(RunRequest::new("trio", "org-1")).unwrap();
        let second_id = second.session_id.clone();
        drain(second.events).await;
        second.task.await.unwrap();

        assert_eq!(host.create_calls(), 3);
        assert_eq!(host.repository_names().len(), 3);
        let session = engine.session(&second_id).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.resources.iter().all(|resource| resource.existed));
    }

    #[tokio::test]
    async fn cleanup_leaves_adopted_repositories_alone() {
        let Harness { engine, host, .. } = harness(FakeSourceHost::new(), FakePlatform::new(), 4);
        host.create_repository_from_template("demo-templates/app", "acme", "one", None, false)
            .await
            .unwrap();

        let handle = engine.run(RunRequest::new("trio", "org-1")).unwrap();
        let session_id = handle.session_id.clone();
        drain(handle.events).await;
        assert_eq!(handle.task.await.unwrap(), PipelineOutcome::Completed);

        let session = engine.session(&session_id).unwrap().unwrap();
        let adopted: Vec<_> = session
            .resources
            .iter()
            .filter(|resource| resource.existed)
            .map(|resource| resource.name.as_str())
            .collect();
        assert_eq!(adopted, vec!["acme/one"]);
        assert_eq!(session.live_resources().count(), 2);

        let preview = engine.cleanup(&session_id, true).await.unwrap();
        let adopted_preview = preview.results.iter().find(|result| result.name == "acme/one").unwrap();
        assert_eq!(adopted_preview.status, CleanupStatus::Skipped);

        let report = engine.cleanup(&session_id, false).await.unwrap();
        let adopted_result = report.results.iter().find(|result| result.name == "acme/one").unwrap();
        assert_eq!(adopted_result.status, CleanupStatus::Skipped);
        assert_eq!(adopted_result.message.as_deref(), Some("pre-existing, not created by this session"));
        assert_eq!(report.cleaned_count, 2);

        let mut deleted = host.deleted_repositories();
        deleted.sort();
        assert_eq!(deleted, vec!["acme/three", "acme/two"]);
        assert_eq!(host.repository_names(), vec!["acme/one"]);

        let session = engine.session(&session_id).unwrap().unwrap();
        assert_eq!(session.deletions.len(), 2);
        assert_eq!(session.live_resources().count(), 0);
    }

    #[tokio::test]
    async fn phase_items_run_up_to_the_concurrency_limit() {
        for (limit, expected_peak) in [(1, 1), (2, 2), (4, 3)] {
            let Harness { engine, host, .. } = harness(FakeSourceHost::new(), FakePlatform::new(), limit);
            let handle = engine.run(RunRequest::new("trio", "org-1")).unwrap();
            drain(handle.events).await;
            assert_eq!(handle.task.await.unwrap(), PipelineOutcome::Completed);
            assert_eq!(host.create_calls(), 3);
            assert_eq!(host.peak_concurrent_creates(), expected_peak, "limit {limit}");
        }
    }

    #[tokio::test]
    async fn failing_item_does_not_stop_its_siblings() {
        let Harness { engine, host, .. } = harness(FakeSourceHost::new().failing_on("two"), FakePlatform::new(), 1);

        let handle = engine.run(RunRequest::new("trio", "org-1")).unwrap();
        let session_id = handle.session_id.clone();
        let events = drain(handle.events).await;
        let outcome = handle.task.await.unwrap();

        assert_eq!(host.create_calls(), 3);
        match &outcome {
            PipelineOutcome::Failed { phase, failures } => {
                assert_eq!(*phase, demoforge_types::PipelinePhase::RepositoryCreation);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].item, "two");
                assert_eq!(failures[0].status, Some(422));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let session = engine.session(&session_id).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.resources.len(), 2);
        assert!(session.error.as_deref().is_some_and(|error| error.contains("two")));
        match events.last() {
            Some(ProgressEvent::ScenarioError { resources, .. }) => assert_eq!(resources.len(), 2),
            other => panic!("unexpected terminal event: {other:?}"),
        }
        assert!(!events.iter().any(|event| matches!(event, ProgressEvent::TaskStart { id, .. } if id == "component_creation")));
    }

    #[tokio::test]
    async fn invalid_parameters_are_rejected_before_any_session() {
        let Harness { engine, host, .. } = harness(FakeSourceHost::new(), FakePlatform::new(), 4);
        let request = RunRequest::new("shop-demo", "org-1").with_parameter("project_name", "My Project");

        let error = engine.run(request).err().expect("validation error");
        assert!(error.is_validation());
        assert!(error.to_string().contains("project_name"));
        assert!(engine.sessions(&SessionFilter::default()).unwrap().is_empty());
        assert_eq!(host.create_calls(), 0);

        let unknown = engine.run(RunRequest::new("missing", "org-1")).err().expect("unknown scenario");
        assert!(matches!(unknown, EngineError::UnknownScenario(_)));
    }

    #[tokio::test]
    async fn dry_run_touches_nothing_external() {
        let Harness { engine, host, platform } = harness(FakeSourceHost::new(), FakePlatform::new(), 4);
        let mut request = shop_request();
        request.dry_run = true;

        let handle = engine.run(request).unwrap();
        let session_id = handle.session_id.clone();
        let events = drain(handle.events).await;
        assert_eq!(handle.task.await.unwrap(), PipelineOutcome::Completed);

        assert_eq!(host.create_calls(), 0);
        assert!(platform.objects(ResourceKind::Flag).is_empty());
        assert!(engine.sessions(&SessionFilter::default()).unwrap().is_empty());
        let session = engine.session(&session_id).unwrap().expect("dry-run session");
        assert_eq!(session.resources.len(), 5);
        assert!(session.resources[1].id.starts_with(clients::DRY_RUN_ID_PREFIX));
        assert!(events.last().is_some_and(ProgressEvent::is_terminal));
    }

    #[tokio::test]
    async fn cancellation_stops_between_phases() {
        let cancel = CancellationToken::new();
        let platform = FakePlatform::new().cancelling_after("shop-web", cancel.clone());
        let Harness { engine, platform, .. } = harness(FakeSourceHost::new().with_file("acme/shop-web", "README.md", "x"), platform, 4);

        let handle = engine.run_with_cancellation(shop_request(), cancel).unwrap();
        let session_id = handle.session_id.clone();
        let events = drain(handle.events).await;
        let outcome = handle.task.await.unwrap();

        assert_eq!(
            outcome,
            PipelineOutcome::Cancelled {
                next_phase: demoforge_types::PipelinePhase::FlagDefinition
            }
        );
        let session = engine.session(&session_id).unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Cancelled);
        assert_eq!(kinds(&session.resources), vec![ResourceKind::Repository, ResourceKind::Component]);
        assert!(platform.objects(ResourceKind::Flag).is_empty());
        assert!(matches!(events.last(), Some(ProgressEvent::ScenarioError { .. })));
        assert!(!engine.cancel(&session_id));
    }

    #[tokio::test]
    async fn subscribing_after_completion_yields_an_ended_stream() {
        let Harness { engine, .. } = harness(FakeSourceHost::new(), FakePlatform::new(), 4);
        let handle = engine.run(RunRequest::new("trio", "org-1")).unwrap();
        let session_id = handle.session_id.clone();
        drain(handle.events).await;
        handle.task.await.unwrap();

        let mut late = engine.subscribe(&session_id);
        assert_eq!(late.next().await, None);
    }

    #[tokio::test]
    async fn undeclared_cross_references_fail_before_provisioning() {
        let Harness { engine, host, .. } = harness(FakeSourceHost::new(), FakePlatform::new(), 4);
        let mut definition: ScenarioDefinition = serde_yaml::from_str(SHOP_SCENARIO).unwrap();
        definition.id = "broken".into();
        definition.flags[0].environments.push("prod".into());
        let engine = ScenarioEngine {
            catalog: ScenarioCatalog::from_definitions(vec![definition]).unwrap(),
            ..engine
        };

        let mut request = shop_request();
        request.scenario_id = "broken".into();
        match engine.run(request) {
            Err(EngineError::Dependencies(errors)) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].target, "prod");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("run should not start"),
        }
        assert_eq!(host.create_calls(), 0);
    }

    #[tokio::test]
    async fn cleanup_deletes_in_reverse_creation_order() {
        let Harness { engine, host, platform } = harness(FakeSourceHost::new(), FakePlatform::new(), 4);
        let repository = host
            .create_repository_from_template("demo-templates/app", "acme", "web", None, false)
            .await
            .unwrap();
        let component = platform.create_component("org-1", "web", &repository.html_url).await.unwrap();
        let environment = platform.create_environment("org-1", "dev", None).await.unwrap();
        let application = platform
            .create_application(
                "org-1",
                &clients::NewApplication {
                    name: "shop".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let flag = platform
            .create_flag("org-1", "checkout", demoforge_types::FlagType::Boolean, None)
            .await
            .unwrap();

        let session = engine.ledger.begin("shop-demo", "org-1", None, None).unwrap();
        for record in [
            ResourceRecord::new(ResourceKind::Repository, repository.id.to_string(), repository.full_name.clone()),
            ResourceRecord::new(ResourceKind::Component, component.id, "web"),
            ResourceRecord::new(ResourceKind::Environment, environment.id, "dev"),
            ResourceRecord::new(ResourceKind::Application, application.id, "shop"),
            ResourceRecord::new(ResourceKind::Flag, flag.id, "checkout"),
        ] {
            engine.ledger.record(&session.id, record).unwrap();
        }

        let running = engine.cleanup(&session.id, false).await;
        assert!(matches!(running, Err(EngineError::SessionActive(_))));

        engine.ledger.finalize(&session.id, SessionStatus::Completed, None).unwrap();
        let preview = engine.cleanup(&session.id, true).await.unwrap();
        assert!(preview.results.iter().all(|result| result.status == CleanupStatus::WouldDelete));
        assert_eq!(preview.cleaned_count, 0);

        let report = engine.cleanup(&session.id, false).await.unwrap();
        let order: Vec<_> = report.results.iter().map(|result| result.kind).collect();
        assert_eq!(
            order,
            vec![
                ResourceKind::Flag,
                ResourceKind::Application,
                ResourceKind::Environment,
                ResourceKind::Component,
                ResourceKind::Repository
            ]
        );
        assert_eq!(report.cleaned_count, 5);
        assert_eq!(host.deleted_repositories(), vec!["acme/web"]);
        assert_eq!(
            platform.deletions().into_iter().map(|(kind, _)| kind).collect::<Vec<_>>(),
            vec![ResourceKind::Flag, ResourceKind::Application, ResourceKind::Environment, ResourceKind::Component]
        );

        let again = engine.cleanup(&session.id, false).await.unwrap();
        assert!(again.results.iter().all(|result| result.status == CleanupStatus::Skipped));
        assert_eq!(again.cleaned_count, 0);
    }

    #[tokio::test]
    async fn cleanup_is_best_effort() {
        let platform = FakePlatform::new().failing_delete_of("new-checkout");
        let host = FakeSourceHost::new().with_file("acme/shop-web", "README.md", "# __PROJECT__");
        let Harness { engine, host, platform } = harness(host, platform, 4);

        let handle = engine.run(shop_request()).unwrap();
        let session_id = handle.session_id.clone();
        drain(handle.events).await;
        handle.task.await.unwrap();
        platform.forget("dev");

        let report = engine.cleanup(&session_id, false).await.unwrap();
        let status_of = |kind: ResourceKind| {
            report
                .results
                .iter()
                .find(|result| result.kind == kind)
                .map(|result| result.status)
        };
        assert_eq!(status_of(ResourceKind::Flag), Some(CleanupStatus::Error));
        assert_eq!(status_of(ResourceKind::Environment), Some(CleanupStatus::Skipped));
        assert_eq!(status_of(ResourceKind::Application), Some(CleanupStatus::Deleted));
        assert_eq!(status_of(ResourceKind::Repository), Some(CleanupStatus::Deleted));
        assert_eq!(report.cleaned_count, 3);
        assert!(host.repository_names().is_empty());

        let session = engine.session(&session_id).unwrap().unwrap();
        assert_eq!(session.deletions.len(), 4);
        assert_eq!(session.live_resources().map(|resource| resource.kind).collect::<Vec<_>>(), vec![ResourceKind::Flag]);
    }

    #[tokio::test]
    async fn preflight_reports_missing_organization_items() {
        let platform = FakePlatform::new().with_property("UNIFY_API", false);
        let Harness { engine, platform, .. } = harness(FakeSourceHost::new(), platform, 4);

        let report = engine.preflight("shop-demo", "org-1").await.unwrap();
        assert_eq!(report.present_properties, vec!["UNIFY_API"]);
        assert_eq!(report.missing_secrets, vec!["NPM_TOKEN"]);

        let mut values = IndexMap::new();
        values.insert("NPM_TOKEN".to_string(), "token".to_string());
        engine.create_properties(&report, &values).await.unwrap();
        assert_eq!(platform.properties(), vec!["NPM_TOKEN", "UNIFY_API"]);
        assert!(engine.preflight("shop-demo", "org-1").await.unwrap().is_satisfied());
    }
}
