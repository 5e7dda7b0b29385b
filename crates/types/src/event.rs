//! Progress events streamed to observers of a running session.

use serde::{Deserialize, Serialize};

use crate::resource::ResourceRecord;

/// Lifecycle event; serialized with a `type` discriminator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    TaskStart {
        id: String,
        description: String,
        total: usize,
    },
    TaskProgress {
        id: String,
        current: usize,
        total: usize,
        message: String,
    },
    TaskComplete {
        id: String,
        success: bool,
        message: String,
    },
    TaskError {
        id: String,
        error: String,
    },
    ScenarioComplete {
        session_id: String,
        resources: Vec<ResourceRecord>,
    },
    ScenarioError {
        session_id: String,
        error: String,
        resources: Vec<ResourceRecord>,
    },
}

impl ProgressEvent {
    /// True for the events that close a session's stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ScenarioComplete { .. } | Self::ScenarioError { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_with_type_tag() {
        let event = ProgressEvent::TaskProgress {
            id: "repository_creation".into(),
            current: 1,
            total: 3,
            message: "created org/app".into(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "task_progress", "id": "repository_creation", "current": 1, "total": 3, "message": "created org/app"})
        );
        assert!(!event.is_terminal());
        assert!(
            ProgressEvent::ScenarioComplete {
                session_id: "s".into(),
                resources: vec![]
            }
            .is_terminal()
        );
    }
}
