//! Session persistence.
//!
//! Sessions are stored whole and keyed by id. Every mutation runs under the store lock and,
//! for the JSON backend, is flushed to disk before the lock is released, so concurrent
//! writers (item tasks recording resources) are serialized through a single lane. The JSON
//! backend applies a mutation to a copy and only adopts it once the write succeeded, so
//! memory never holds state the file lacks.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use demoforge_types::{Session, SessionFilter};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::path_processing::{demoforge_config_dir, expand_tilde};

/// Environment variable overriding the session file location.
pub const SESSIONS_PATH_ENV: &str = "DEMOFORGE_SESSIONS_PATH";

/// Errors surfaced by session store operations.
#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("session I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("session serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("session '{0}' not found")]
    NotFound(String),
    #[error("session '{0}' already exists")]
    Duplicate(String),
    /// A mutation was refused by the caller's rules (for example, a terminal session).
    #[error("session '{id}' rejected update: {reason}")]
    Rejected { id: String, reason: String },
}

/// Mutation applied to a stored session under the store lock.
pub type SessionUpdate<'a> = &'a mut dyn FnMut(&mut Session) -> Result<(), SessionStoreError>;

/// Shared trait implemented by session persistence backends.
pub trait SessionStore: Send + Sync {
    /// Store a new session. Fails when the id is already taken.
    fn insert(&self, session: Session) -> Result<(), SessionStoreError>;

    fn get(&self, id: &str) -> Result<Option<Session>, SessionStoreError>;

    /// Apply `update` atomically and return the updated session. When `update` fails
    /// nothing is persisted.
    fn update(&self, id: &str, update: SessionUpdate<'_>) -> Result<Session, SessionStoreError>;

    /// Sessions matching `filter`, oldest first.
    fn list(&self, filter: &SessionFilter, now: DateTime<Utc>) -> Result<Vec<Session>, SessionStoreError>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct SessionFile {
    #[serde(default)]
    sessions: Vec<Session>,
}

impl SessionFile {
    fn insert(&mut self, session: Session) -> Result<(), SessionStoreError> {
        if self.sessions.iter().any(|existing| existing.id == session.id) {
            return Err(SessionStoreError::Duplicate(session.id));
        }
        self.sessions.push(session);
        Ok(())
    }

    fn get(&self, id: &str) -> Option<Session> {
        self.sessions.iter().find(|session| session.id == id).cloned()
    }

    fn update(&mut self, id: &str, update: SessionUpdate<'_>) -> Result<Session, SessionStoreError> {
        let session = self
            .sessions
            .iter_mut()
            .find(|session| session.id == id)
            .ok_or_else(|| SessionStoreError::NotFound(id.to_string()))?;
        let mut candidate = session.clone();
        update(&mut candidate)?;
        *session = candidate.clone();
        Ok(candidate)
    }

    fn list(&self, filter: &SessionFilter, now: DateTime<Utc>) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.iter().filter(|session| filter.matches(session, now)).cloned().collect();
        sessions.sort_by_key(|session| session.created_at);
        sessions
    }
}

/// JSON-backed session store persisted on disk.
pub struct JsonSessionStore {
    path: PathBuf,
    file: Mutex<SessionFile>,
}

impl JsonSessionStore {
    /// Open the store at `path`, or at the default location when omitted.
    pub fn new<P: Into<Option<PathBuf>>>(path: P) -> Result<Self, SessionStoreError> {
        let resolved_path = match path.into() {
            Some(path) => expand_tilde(&path.to_string_lossy()),
            None => default_sessions_path(),
        };
        let file = load_session_file(&resolved_path)?;
        Ok(Self {
            path: resolved_path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save_locked(&self, file: &SessionFile) -> Result<(), SessionStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(file)?;
        fs::write(&self.path, content)?;
        Ok(())
    }
}

impl SessionStore for JsonSessionStore {
    fn insert(&self, session: Session) -> Result<(), SessionStoreError> {
        let mut file = self.file.lock().expect("session lock poisoned");
        let mut candidate = file.clone();
        candidate.insert(session)?;
        self.save_locked(&candidate)?;
        *file = candidate;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Session>, SessionStoreError> {
        let file = self.file.lock().expect("session lock poisoned");
        Ok(file.get(id))
    }

    fn update(&self, id: &str, update: SessionUpdate<'_>) -> Result<Session, SessionStoreError> {
        let mut file = self.file.lock().expect("session lock poisoned");
        let mut candidate = file.clone();
        let updated = candidate.update(id, update)?;
        self.save_locked(&candidate)?;
        *file = candidate;
        Ok(updated)
    }

    fn list(&self, filter: &SessionFilter, now: DateTime<Utc>) -> Result<Vec<Session>, SessionStoreError> {
        let file = self.file.lock().expect("session lock poisoned");
        Ok(file.list(filter, now))
    }
}

/// In-memory session store used for dry runs and tests.
#[derive(Default)]
pub struct InMemorySessionStore {
    file: Mutex<SessionFile>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn insert(&self, session: Session) -> Result<(), SessionStoreError> {
        self.file.lock().expect("session lock poisoned").insert(session)
    }

    fn get(&self, id: &str) -> Result<Option<Session>, SessionStoreError> {
        Ok(self.file.lock().expect("session lock poisoned").get(id))
    }

    fn update(&self, id: &str, update: SessionUpdate<'_>) -> Result<Session, SessionStoreError> {
        self.file.lock().expect("session lock poisoned").update(id, update)
    }

    fn list(&self, filter: &SessionFilter, now: DateTime<Utc>) -> Result<Vec<Session>, SessionStoreError> {
        Ok(self.file.lock().expect("session lock poisoned").list(filter, now))
    }
}

fn default_sessions_path() -> PathBuf {
    if let Ok(path) = env::var(SESSIONS_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }
    demoforge_config_dir().join(crate::config::SESSIONS_FILE_NAME)
}

fn load_session_file(path: &Path) -> Result<SessionFile, SessionStoreError> {
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<SessionFile>(&content) {
            Ok(file) => Ok(file),
            Err(error) => {
                // An unreadable ledger is never replaced by an empty one.
                warn!("Failed to parse session file at {}: {}", path.display(), error);
                Err(SessionStoreError::Serialization(error))
            }
        },
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(SessionFile::default()),
        Err(error) => Err(SessionStoreError::Io(error)),
    }
}
