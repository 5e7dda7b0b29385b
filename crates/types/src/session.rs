//! Durable session records.
//!
//! A session is created when a run starts and accumulates the resources it creates. Once the
//! run reaches a terminal status only cleanup may touch it, and only by recording deletions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resource::{ResourceKind, ResourceRecord};

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Resource removed by cleanup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeletionRecord {
    pub kind: ResourceKind,
    pub id: String,
    pub deleted_at: DateTime<Utc>,
}

/// One scenario run and everything it created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub scenario_id: String,
    pub org_id: String,
    /// Environment target (preset or custom) the run resolved `env.*` against.
    #[serde(default)]
    pub environment: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    /// Resources in the order their creation completed.
    #[serde(default)]
    pub resources: Vec<ResourceRecord>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deletions: Vec<DeletionRecord>,
}

impl Session {
    pub fn new(id: impl Into<String>, scenario_id: impl Into<String>, org_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            scenario_id: scenario_id.into(),
            org_id: org_id.into(),
            environment: None,
            created_at: Utc::now(),
            expires_at: None,
            status: SessionStatus::Pending,
            resources: Vec::new(),
            error: None,
            finished_at: None,
            deletions: Vec::new(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    pub fn is_deleted(&self, resource: &ResourceRecord) -> bool {
        self.deletions
            .iter()
            .any(|deletion| deletion.kind == resource.kind && deletion.id == resource.id)
    }

    /// Resources created by the session and not yet removed by cleanup. Adopted repositories
    /// are never cleanup's to remove.
    pub fn live_resources(&self) -> impl Iterator<Item = &ResourceRecord> {
        self.resources
            .iter()
            .filter(|resource| !resource.existed && !self.is_deleted(resource))
    }

    /// Resources sorted by declaration rather than completion order.
    pub fn resources_in_spec_order(&self) -> Vec<&ResourceRecord> {
        let mut ordered: Vec<_> = self.resources.iter().collect();
        ordered.sort_by_key(|resource| (phase_rank(resource.kind), resource.spec_index));
        ordered
    }
}

fn phase_rank(kind: ResourceKind) -> u8 {
    match kind {
        ResourceKind::Repository => 0,
        ResourceKind::Component => 1,
        ResourceKind::Flag => 2,
        ResourceKind::Environment => 3,
        ResourceKind::Application => 4,
    }
}

/// Query over stored sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFilter {
    pub org_id: Option<String>,
    pub expired_only: bool,
}

impl SessionFilter {
    pub fn for_org(org_id: impl Into<String>) -> Self {
        Self {
            org_id: Some(org_id.into()),
            expired_only: false,
        }
    }

    pub fn expired() -> Self {
        Self {
            org_id: None,
            expired_only: true,
        }
    }

    pub fn matches(&self, session: &Session, now: DateTime<Utc>) -> bool {
        if let Some(org_id) = &self.org_id
            && &session.org_id != org_id
        {
            return false;
        }
        !self.expired_only || session.is_expired(now)
    }
}
