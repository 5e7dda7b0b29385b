//! Command handlers. Each builds only the pieces it needs from the configuration.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use demoforge_api::github::split_full_name;
use demoforge_api::{EnvCredentials, GithubClient, UnifyClient};
use demoforge_engine::{
    CleanupReport, EngineSettings, NoopPlatform, NoopSourceHost, Platform, PipelineOutcome, RunRequest, ScenarioCatalog, ScenarioEngine,
    SourceHost,
};
use demoforge_types::{ProgressEvent, SessionFilter};
use demoforge_util::{DemoforgeConfig, EnvironmentTarget, JsonSessionStore, SessionStore, load_config};
use serde_json::Value;
use tracing::{info, warn};

use crate::{PreflightArgs, RunArgs};

fn config() -> Result<DemoforgeConfig> {
    load_config().context("failed to load configuration")
}

fn catalog(config: &DemoforgeConfig) -> Result<ScenarioCatalog> {
    let directory = config.scenarios_dir();
    ScenarioCatalog::load_dir(&directory).with_context(|| format!("failed to load scenarios from {}", directory.display()))
}

fn session_store(config: &DemoforgeConfig) -> Result<Arc<JsonSessionStore>> {
    let path = config
        .sessions_path
        .as_deref()
        .filter(|path| !path.trim().is_empty())
        .map(PathBuf::from);
    Ok(Arc::new(JsonSessionStore::new(path).context("failed to open session store")?))
}

fn github(config: &DemoforgeConfig) -> Result<GithubClient> {
    GithubClient::from_credentials(&config.github_api_base(), &EnvCredentials).context("failed to build source-host client")
}

/// Clients for a target; dry runs never need credentials.
fn clients(config: &DemoforgeConfig, target: &EnvironmentTarget, offline: bool) -> Result<(Arc<dyn SourceHost>, Arc<dyn Platform>)> {
    if offline {
        return Ok((Arc::new(NoopSourceHost::new()), Arc::new(NoopPlatform)));
    }
    let platform = UnifyClient::from_credentials(&target.unify_api, &EnvCredentials).context("failed to build platform client")?;
    Ok((Arc::new(github(config)?), Arc::new(platform)))
}

fn engine(config: &DemoforgeConfig, catalog: ScenarioCatalog, target: &EnvironmentTarget, offline: bool) -> Result<ScenarioEngine> {
    let (source_host, platform) = clients(config, target, offline)?;
    Ok(ScenarioEngine::new(
        catalog,
        source_host,
        platform,
        session_store(config)?,
        EngineSettings::from_config(config),
    ))
}

/// Parse `NAME=VALUE`. Values that read as JSON scalars keep their type; anything else is a
/// string.
pub(crate) fn parse_param(raw: &str) -> Result<(String, Value)> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("parameter '{raw}' must look like NAME=VALUE"))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("parameter '{raw}' has an empty name");
    }
    let value = match serde_json::from_str::<Value>(value) {
        Ok(parsed @ (Value::Bool(_) | Value::Number(_))) => parsed,
        _ => Value::String(value.to_string()),
    };
    Ok((name.to_string(), value))
}

fn run_request(config: &DemoforgeConfig, args: &RunArgs) -> Result<(RunRequest, EnvironmentTarget)> {
    let environment_name = args.environment.clone().unwrap_or_else(|| config.default_environment.clone());
    let target = config.environment(Some(environment_name.as_str()))?;
    let mut request = RunRequest::new(&args.scenario, &args.org);
    for raw in &args.params {
        let (name, value) = parse_param(raw)?;
        request.parameters.insert(name, value);
    }
    request.environment_name = Some(environment_name);
    request.environment = target.clone();
    request.ttl_days = args.ttl_days;
    request.dry_run = args.dry_run;
    request.repository_owner = args.owner.clone();
    Ok((request, target))
}

pub fn list_scenarios() -> Result<()> {
    let catalog = catalog(&config()?)?;
    if catalog.is_empty() {
        println!("No scenarios found");
        return Ok(());
    }
    for entry in catalog.entries() {
        let definition = &entry.definition;
        let marker = if definition.wip { " (wip)" } else { "" };
        println!("{:<32} {}{}", definition.id, definition.display_name(), marker);
    }
    Ok(())
}

pub fn show_scenario(id: &str) -> Result<()> {
    let catalog = catalog(&config()?)?;
    let entry = catalog.entry(id).ok_or_else(|| anyhow!("unknown scenario '{id}'"))?;
    println!("{}", serde_yaml::to_string(entry.definition.as_ref())?);
    for issue in &entry.issues {
        println!("warning: {}: {}", issue.path, issue.message);
    }
    Ok(())
}

pub fn plan(args: RunArgs) -> Result<()> {
    let config = config()?;
    let (request, target) = run_request(&config, &args)?;
    let engine = engine(&config, catalog(&config)?, &target, true)?;
    let plan = engine.plan(&request)?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

pub async fn preflight(args: PreflightArgs) -> Result<()> {
    let config = config()?;
    let target = config.environment(args.environment.as_deref())?;
    let engine = engine(&config, catalog(&config)?, &target, false)?;
    let report = engine.preflight(&args.scenario, &args.org).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.is_satisfied() {
        warn!(
            missing_properties = report.missing_properties.len(),
            missing_secrets = report.missing_secrets.len(),
            "organization is missing expected items"
        );
    }
    Ok(())
}

pub async fn run(args: RunArgs) -> Result<()> {
    let config = config()?;
    let (request, target) = run_request(&config, &args)?;
    let engine = engine(&config, catalog(&config)?, &target, args.dry_run)?;
    let mut handle = engine.run(request)?;
    info!(session = %handle.session_id, "run started");

    loop {
        tokio::select! {
            event = handle.events.next() => match event {
                Some(event) => print_event(&event, args.json)?,
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !handle.cancel.is_cancelled() => {
                warn!(session = %handle.session_id, "interrupt received; stopping after the current phase");
                handle.cancel.cancel();
            }
        }
    }

    match handle.task.await.context("run task panicked")? {
        PipelineOutcome::Completed => Ok(()),
        outcome => Err(anyhow!(
            "session {} did not complete: {}",
            handle.session_id,
            outcome.error_message().unwrap_or_default()
        )),
    }
}

fn print_event(event: &ProgressEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match event {
        ProgressEvent::TaskStart { description, total, .. } => println!("==> {description} ({total})"),
        ProgressEvent::TaskProgress { current, total, message, .. } => println!("    [{current}/{total}] {message}"),
        ProgressEvent::TaskComplete { message, .. } => println!("    {message}"),
        ProgressEvent::TaskError { error, .. } => println!("    error: {error}"),
        ProgressEvent::ScenarioComplete { session_id, resources } => {
            println!("session {session_id} completed with {} resource(s)", resources.len());
        }
        ProgressEvent::ScenarioError { session_id, error, resources } => {
            println!("session {session_id} failed with {} resource(s): {error}", resources.len());
        }
    }
    Ok(())
}

pub fn list_sessions(org: Option<String>, expired: bool) -> Result<()> {
    let config = config()?;
    let filter = SessionFilter {
        org_id: org,
        expired_only: expired,
    };
    let sessions = session_store(&config)?.list(&filter, Utc::now())?;
    for session in sessions.iter().rev() {
        println!(
            "{}  {:<10} {:<24} {:<16} {} resource(s)",
            session.id,
            session.status.as_str(),
            session.scenario_id,
            session.org_id,
            session.live_resources().count()
        );
    }
    Ok(())
}

pub fn show_session(id: &str) -> Result<()> {
    let config = config()?;
    let session = session_store(&config)?
        .get(id)?
        .ok_or_else(|| anyhow!("session '{id}' not found"))?;
    println!("{}", serde_json::to_string_pretty(&session)?);
    Ok(())
}

fn print_report(report: &CleanupReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

pub async fn cleanup(session_id: &str, dry_run: bool) -> Result<()> {
    let config = config()?;
    let session = session_store(&config)?
        .get(session_id)?
        .ok_or_else(|| anyhow!("session '{session_id}' not found"))?;
    let target = config.environment(session.environment.as_deref())?;
    let engine = engine(&config, ScenarioCatalog::default(), &target, dry_run)?;
    let report = engine.cleanup(session_id, dry_run).await?;
    print_report(&report)
}

pub async fn cleanup_expired(dry_run: bool) -> Result<()> {
    let config = config()?;
    let target = config.environment(None)?;
    let engine = engine(&config, ScenarioCatalog::default(), &target, dry_run)?;
    let reports = engine.cleanup_expired(dry_run).await?;
    if reports.is_empty() {
        println!("No expired sessions with live resources");
    }
    for report in &reports {
        print_report(report)?;
    }
    Ok(())
}

pub async fn branches(repository: &str) -> Result<()> {
    let (owner, name) = split_full_name(repository)?;
    for branch in github(&config()?)?.list_branches(owner, name).await? {
        let marker = if branch.protected { " (protected)" } else { "" };
        println!("{}{}", branch.name, marker);
    }
    Ok(())
}

pub async fn pulls(repository: &str) -> Result<()> {
    let (owner, name) = split_full_name(repository)?;
    for pull in github(&config()?)?.list_open_pull_requests(owner, name).await? {
        println!("#{:<6} {}  {}", pull.number, pull.title, pull.html_url);
    }
    Ok(())
}
