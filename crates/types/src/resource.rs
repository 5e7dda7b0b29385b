//! Records of externally created resources.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of artifact created on an external platform.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Repository,
    Component,
    Environment,
    Application,
    Flag,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Repository => "repository",
            Self::Component => "component",
            Self::Environment => "environment",
            Self::Application => "application",
            Self::Flag => "flag",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One created artifact, owned by the session that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceRecord {
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    /// Platform-assigned identifier.
    pub id: String,
    /// Human name; repositories use `owner/name`.
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub org_id: Option<String>,
    /// Position of the originating declaration, for callers that need declaration order.
    #[serde(default)]
    pub spec_index: usize,
    /// True when a repository with the target name already existed.
    #[serde(default)]
    pub existed: bool,
    pub created_at: DateTime<Utc>,
}

impl ResourceRecord {
    pub fn new(kind: ResourceKind, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            name: name.into(),
            url: None,
            org_id: None,
            spec_index: 0,
            existed: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    pub fn with_spec_index(mut self, spec_index: usize) -> Self {
        self.spec_index = spec_index;
        self
    }

    /// Key identifying the record within a session.
    pub fn key(&self) -> (ResourceKind, &str) {
        (self.kind, self.id.as_str())
    }
}
