//! Resource ledger: the session lifecycle on top of a [`SessionStore`].
//!
//! Every mutation goes through [`SessionStore::update`], which serializes writers under the
//! store lock. A session accepts resource records only while it is not terminal; after
//! finalization the only permitted change is recording deletions.

use std::sync::Arc;

use chrono::{Duration, Utc};
use demoforge_types::{DeletionRecord, ResourceRecord, Session, SessionFilter, SessionStatus};
use demoforge_util::{SessionStore, SessionStoreError};
use tracing::debug;
use uuid::Uuid;

/// Handle to the session store shared by every task of a run.
#[derive(Clone)]
pub struct ResourceLedger {
    store: Arc<dyn SessionStore>,
}

impl ResourceLedger {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Create a `pending` session and return it.
    pub fn begin(&self, scenario_id: &str, org_id: &str, environment: Option<&str>, ttl_days: Option<u32>) -> Result<Session, SessionStoreError> {
        let mut session = Session::new(Uuid::new_v4().to_string(), scenario_id, org_id);
        session.environment = environment.map(str::to_string);
        session.expires_at = ttl_days.map(|days| session.created_at + Duration::days(i64::from(days)));
        self.store.insert(session.clone())?;
        debug!(session = %session.id, scenario = %scenario_id, org = %org_id, "session created");
        Ok(session)
    }

    pub fn mark_running(&self, session_id: &str) -> Result<Session, SessionStoreError> {
        self.store.update(session_id, &mut |session: &mut Session| {
            if session.status != SessionStatus::Pending {
                return Err(SessionStoreError::Rejected {
                    id: session.id.clone(),
                    reason: format!("cannot start a {} session", session.status.as_str()),
                });
            }
            session.status = SessionStatus::Running;
            Ok(())
        })
    }

    /// Append a created resource. Rejected once the session is terminal.
    pub fn record(&self, session_id: &str, resource: ResourceRecord) -> Result<(), SessionStoreError> {
        let mut pending = Some(resource);
        self.store.update(session_id, &mut |session: &mut Session| {
            if session.status.is_terminal() {
                return Err(SessionStoreError::Rejected {
                    id: session.id.clone(),
                    reason: format!("session is {}", session.status.as_str()),
                });
            }
            if let Some(resource) = pending.take() {
                session.resources.push(resource);
            }
            Ok(())
        })?;
        Ok(())
    }

    /// Mark the session terminal. A second call is rejected.
    pub fn finalize(&self, session_id: &str, status: SessionStatus, error: Option<String>) -> Result<Session, SessionStoreError> {
        if !status.is_terminal() {
            return Err(SessionStoreError::Rejected {
                id: session_id.to_string(),
                reason: format!("{} is not a terminal status", status.as_str()),
            });
        }
        let session = self.store.update(session_id, &mut |session: &mut Session| {
            if session.status.is_terminal() {
                return Err(SessionStoreError::Rejected {
                    id: session.id.clone(),
                    reason: format!("session already {}", session.status.as_str()),
                });
            }
            session.status = status;
            session.error = error.clone();
            session.finished_at = Some(Utc::now());
            Ok(())
        })?;
        debug!(session = %session_id, status = status.as_str(), resources = session.resources.len(), "session finalized");
        Ok(session)
    }

    /// Note that cleanup removed (or found absent) one of the session's resources.
    pub fn record_deletion(&self, session_id: &str, resource: &ResourceRecord) -> Result<(), SessionStoreError> {
        self.store.update(session_id, &mut |session: &mut Session| {
            if !session.is_deleted(resource) {
                session.deletions.push(DeletionRecord {
                    kind: resource.kind,
                    id: resource.id.clone(),
                    deleted_at: Utc::now(),
                });
            }
            Ok(())
        })?;
        Ok(())
    }

    pub fn get(&self, session_id: &str) -> Result<Option<Session>, SessionStoreError> {
        self.store.get(session_id)
    }

    pub fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>, SessionStoreError> {
        self.store.list(filter, Utc::now())
    }

    /// Resources recorded so far, in completion order.
    pub fn resources(&self, session_id: &str) -> Result<Vec<ResourceRecord>, SessionStoreError> {
        self.store
            .get(session_id)?
            .map(|session| session.resources)
            .ok_or_else(|| SessionStoreError::NotFound(session_id.to_string()))
    }
}
