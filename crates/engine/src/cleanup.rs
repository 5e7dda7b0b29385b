//! Best-effort teardown of everything a session created.

use demoforge_api::ApiError;
use demoforge_api::github::split_full_name;
use demoforge_types::{ResourceKind, ResourceRecord, Session};
use demoforge_util::redact_sensitive;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clients::{Platform, SourceHost};
use crate::error::EngineError;
use crate::ledger::ResourceLedger;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStatus {
    Deleted,
    Error,
    /// Already absent, or already removed by an earlier cleanup.
    Skipped,
    WouldDelete,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CleanupResult {
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub id: String,
    pub name: String,
    pub status: CleanupStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CleanupReport {
    pub session_id: String,
    pub dry_run: bool,
    /// Resources actually deleted by this call.
    pub cleaned_count: usize,
    /// One entry per resource, in deletion order.
    pub results: Vec<CleanupResult>,
}

const PRE_EXISTING: &str = "pre-existing, not created by this session";

/// Delete the session's resources in reverse creation order. Repositories the session adopted
/// rather than created are left in place. Failures never stop the remaining deletions;
/// deleted and skipped resources are recorded on the session.
pub async fn cleanup_session(
    ledger: &ResourceLedger,
    source_host: &dyn SourceHost,
    platform: &dyn Platform,
    session_id: &str,
    dry_run: bool,
) -> Result<CleanupReport, EngineError> {
    let session = ledger.get(session_id)?.ok_or_else(|| EngineError::SessionNotFound(session_id.to_string()))?;
    if !session.status.is_terminal() {
        return Err(EngineError::SessionActive(session_id.to_string()));
    }

    let mut results = Vec::with_capacity(session.resources.len());
    for resource in session.resources.iter().rev() {
        let (status, message) = if session.is_deleted(resource) {
            (CleanupStatus::Skipped, Some("already deleted".to_string()))
        } else if resource.existed {
            (CleanupStatus::Skipped, Some(PRE_EXISTING.to_string()))
        } else if dry_run {
            (CleanupStatus::WouldDelete, None)
        } else {
            match delete_resource(&session, resource, source_host, platform).await {
                Ok(true) => (CleanupStatus::Deleted, None),
                Ok(false) => (CleanupStatus::Skipped, Some("already absent".to_string())),
                Err(error) if error.is_not_found() => (CleanupStatus::Skipped, Some("already absent".to_string())),
                Err(error) => {
                    let message = redact_sensitive(&error.to_string());
                    warn!(session = %session_id, kind = %resource.kind, id = %resource.id, error = %message, "cleanup failed");
                    (CleanupStatus::Error, Some(message))
                }
            }
        };

        if !dry_run && !resource.existed && matches!(status, CleanupStatus::Deleted | CleanupStatus::Skipped) && !session.is_deleted(resource) {
            ledger.record_deletion(session_id, resource)?;
        }
        results.push(CleanupResult {
            kind: resource.kind,
            id: resource.id.clone(),
            name: resource.name.clone(),
            status,
            message,
        });
    }

    let cleaned_count = results.iter().filter(|result| result.status == CleanupStatus::Deleted).count();
    info!(session = %session_id, dry_run, cleaned_count, total = results.len(), "cleanup finished");
    Ok(CleanupReport {
        session_id: session_id.to_string(),
        dry_run,
        cleaned_count,
        results,
    })
}

async fn delete_resource(session: &Session, resource: &ResourceRecord, source_host: &dyn SourceHost, platform: &dyn Platform) -> Result<bool, ApiError> {
    match resource.kind {
        ResourceKind::Repository => {
            let (owner, name) = split_full_name(&resource.name)?;
            source_host.delete_repository(owner, name).await
        }
        kind => {
            let org_id = resource.org_id.as_deref().unwrap_or(&session.org_id);
            platform.delete_resource(org_id, kind, &resource.id).await
        }
    }
}
