//! Repository creation: generate from a template (or adopt an existing repository), then
//! rewrite files, apply the selected file operations, and upload sealed secrets.

use demoforge_api::ApiError;
use demoforge_api::github::split_full_name;
use demoforge_types::{FileOperation, PipelinePhase, ResolvedRepository, ResourceKind, ResourceRecord};
use tracing::debug;

use super::{ItemError, ItemOutcome, PhaseReport, PipelineContext, Produced, run_phase};
use crate::error::PlatformError;

const PHASE: PipelinePhase = PipelinePhase::RepositoryCreation;
const COMMIT_MESSAGE: &str = "Apply demo scenario customizations";

pub(super) async fn run(ctx: &PipelineContext) -> PhaseReport {
    let repositories: Vec<&ResolvedRepository> = ctx.scenario.repositories.iter().collect();
    run_phase(ctx, PHASE, repositories, |repository| provision(ctx, repository)).await
}

/// Owner and name a repository is created under.
///
/// `owner/name` declarations are taken verbatim. Otherwise the explicit owner wins, then the
/// owner of the template source.
pub fn repository_target(repository: &ResolvedRepository, default_owner: Option<&str>) -> Result<(String, String), ApiError> {
    if repository.name.contains('/') {
        let (owner, name) = split_full_name(&repository.name)?;
        return Ok((owner.to_string(), name.to_string()));
    }
    let owner = match default_owner.filter(|owner| !owner.trim().is_empty()) {
        Some(owner) => owner.to_string(),
        None => split_full_name(&repository.source)?.0.to_string(),
    };
    Ok((owner, repository.name.clone()))
}

async fn provision(ctx: &PipelineContext, repository: &ResolvedRepository) -> ItemOutcome {
    let mut produced = Vec::new();
    let result = provision_inner(ctx, repository, &mut produced).await;
    ItemOutcome::new(repository.name.clone(), produced, result)
}

async fn provision_inner(ctx: &PipelineContext, repository: &ResolvedRepository, produced: &mut Vec<Produced>) -> Result<(), ItemError> {
    let label = repository.name.as_str();
    let api_error = |error: ApiError| ItemError::from(PlatformError::from_api(PHASE, label, &error));

    let (owner, name) = repository_target(repository, ctx.repository_owner.as_deref()).map_err(api_error)?;
    let (created, existed) = match ctx.source_host.find_repository(&owner, &name).await.map_err(api_error)? {
        Some(existing) => {
            debug!(repository = %existing.full_name, "repository already exists");
            (existing, true)
        }
        None => {
            let created = ctx
                .source_host
                .create_repository_from_template(&repository.source, &owner, &name, repository.description.as_deref(), repository.private)
                .await
                .map_err(api_error)?;
            (created, false)
        }
    };

    let mut record = ResourceRecord::new(ResourceKind::Repository, created.id.to_string(), created.full_name.clone())
        .with_url(created.html_url.clone())
        .with_spec_index(repository.spec_index);
    record.existed = existed;
    ctx.record(PHASE, label, record).await?;
    produced.push(Produced {
        kind: ResourceKind::Repository,
        key: repository.name.clone(),
        id: created.id.to_string(),
        url: Some(created.html_url.clone()),
    });

    apply_replacements(ctx, repository, &owner, &name).await?;
    apply_file_operations(ctx, repository, &owner, &name).await?;

    for secret in &repository.secrets {
        ctx.source_host
            .create_encrypted_secret(&owner, &name, &secret.name, &secret.value)
            .await
            .map_err(api_error)?;
    }
    Ok(())
}

async fn apply_replacements(ctx: &PipelineContext, repository: &ResolvedRepository, owner: &str, name: &str) -> Result<(), ItemError> {
    let label = repository.name.as_str();
    for replacement in &repository.replacements {
        let file = ctx
            .source_host
            .read_file(owner, name, &replacement.path)
            .await
            .map_err(|error| PlatformError::from_api(PHASE, label, &error))?
            .ok_or_else(|| PlatformError::new(PHASE, label, format!("file '{}' not found for replacements", replacement.path)))?;

        let updated = replacement
            .values
            .iter()
            .fold(file.content.clone(), |content, (from, to)| content.replace(from.as_str(), to));
        if updated == file.content {
            debug!(repository = %label, path = %replacement.path, "replacements left file unchanged");
            continue;
        }
        ctx.source_host
            .write_file(owner, name, &replacement.path, &updated, COMMIT_MESSAGE, Some(&file.sha))
            .await
            .map_err(|error| PlatformError::from_api(PHASE, label, &error))?;
    }
    Ok(())
}

async fn apply_file_operations(ctx: &PipelineContext, repository: &ResolvedRepository, owner: &str, name: &str) -> Result<(), ItemError> {
    let label = repository.name.as_str();
    let api_error = |error: ApiError| PlatformError::from_api(PHASE, label, &error);

    for operation in &repository.file_operations {
        match operation {
            FileOperation::Move { from, to } | FileOperation::Copy { from, to } => {
                let source = ctx
                    .source_host
                    .read_file(owner, name, from)
                    .await
                    .map_err(api_error)?
                    .ok_or_else(|| PlatformError::new(PHASE, label, format!("file '{from}' not found")))?;
                let destination_sha = ctx.source_host.read_file(owner, name, to).await.map_err(api_error)?.map(|file| file.sha);
                ctx.source_host
                    .write_file(owner, name, to, &source.content, COMMIT_MESSAGE, destination_sha.as_deref())
                    .await
                    .map_err(api_error)?;
                if matches!(operation, FileOperation::Move { .. }) {
                    ctx.source_host.delete_path(owner, name, from, COMMIT_MESSAGE).await.map_err(api_error)?;
                }
            }
            FileOperation::Delete { path } => {
                let removed = ctx.source_host.delete_path(owner, name, path, COMMIT_MESSAGE).await.map_err(api_error)?;
                debug!(repository = %label, path = %path, removed, "deleted path");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repository(name: &str) -> ResolvedRepository {
        ResolvedRepository {
            name: name.into(),
            source: "demo-templates/react-app".into(),
            ..Default::default()
        }
    }

    #[test]
    fn target_prefers_qualified_name_then_owner_then_template_owner() {
        assert_eq!(
            repository_target(&repository("acme/web"), Some("other")).unwrap(),
            ("acme".to_string(), "web".to_string())
        );
        assert_eq!(repository_target(&repository("web"), Some("globex")).unwrap(), ("globex".to_string(), "web".to_string()));
        assert_eq!(
            repository_target(&repository("web"), None).unwrap(),
            ("demo-templates".to_string(), "web".to_string())
        );
    }
}
