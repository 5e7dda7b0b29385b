//! Errors surfaced by the API clients.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{path} returned HTTP {status}: {body}")]
    Status { path: String, status: u16, body: String },

    #[error("request to {path} failed: {source}")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid response from {path}: {reason}")]
    Decode { path: String, reason: String },

    #[error("missing credentials: set {env_var}")]
    MissingCredentials { env_var: &'static str },

    #[error("invalid credentials: {reason}")]
    InvalidCredentials { reason: String },

    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("failed to seal secret '{name}': {reason}")]
    Encryption { name: String, reason: String },
}

impl ApiError {
    /// HTTP status of a rejected request.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}
