//! API clients for the external platforms a scenario run touches.
//!
//! - [`GithubClient`] talks to the source-code host: template generation, file contents,
//!   sealed repository secrets, branch and pull-request listings.
//! - [`UnifyClient`] talks to the deployment and flag-management platform: components,
//!   environments, applications, flags, access keys, and organization properties.
//!
//! Both wrap an [`ApiClient`], a thin layer over a configured `reqwest::Client` that
//! validates its base URL, applies default headers, and maps non-success responses into
//! [`ApiError`]. Tokens come from a [`CredentialSource`]; the engine never reads ambient
//! settings itself.

use std::env;
use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, Url, header};
use serde::de::DeserializeOwned;
use tracing::debug;

pub mod error;
pub mod github;
pub mod unify;

pub use error::ApiError;
pub use github::GithubClient;
pub use unify::UnifyClient;

/// Hostnames allowed for local development regardless of scheme.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1"];

/// External service a credential belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    SourceHost,
    Platform,
}

impl Service {
    /// Environment variable holding the service token.
    pub fn token_env_var(self) -> &'static str {
        match self {
            Self::SourceHost => "GITHUB_TOKEN",
            Self::Platform => "UNIFY_API_TOKEN",
        }
    }
}

/// Opaque credential lookup.
pub trait CredentialSource: Send + Sync {
    fn token(&self, service: Service) -> Option<String>;
}

/// Reads tokens from process environment variables.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn token(&self, service: Service) -> Option<String> {
        env::var(service.token_env_var()).ok().filter(|token| !token.trim().is_empty())
    }
}

/// Configured HTTP client bound to one base URL.
#[derive(Debug, Clone)]
pub struct ApiClient {
    pub base_url: String,
    pub http: Client,
    pub user_agent: String,
}

impl ApiClient {
    /// Build a client with bearer authentication and the given `Accept` header.
    pub fn new(base_url: &str, token: &str, accept: &str) -> Result<Self, ApiError> {
        validate_base_url(base_url)?;

        let mut default_headers = header::HeaderMap::new();
        let authorization = header::HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|error| ApiError::InvalidCredentials {
            reason: error.to_string(),
        })?;
        default_headers.insert(header::AUTHORIZATION, authorization);
        if let Ok(accept) = header::HeaderValue::from_str(accept) {
            default_headers.insert(header::ACCEPT, accept);
        }

        let http = Client::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|source| ApiError::Transport {
                path: base_url.to_string(),
                source,
            })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            user_agent: format!("demoforge/{}; {}", env!("CARGO_PKG_VERSION"), env::consts::OS),
        })
    }

    /// Build a request for an API-relative path.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, "building request");
        self.http.request(method, url).header(header::USER_AGENT, &self.user_agent)
    }

    /// Send a request and decode a JSON body.
    pub async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder, path: &str) -> Result<T, ApiError> {
        let response = self.send(builder, path).await?;
        response.json::<T>().await.map_err(|error| ApiError::Decode {
            path: path.to_string(),
            reason: error.to_string(),
        })
    }

    /// Send a request and decode a JSON body; a 404 becomes `None`.
    pub async fn send_optional_json<T: DeserializeOwned>(&self, builder: RequestBuilder, path: &str) -> Result<Option<T>, ApiError> {
        match self.send_json(builder, path).await {
            Ok(value) => Ok(Some(value)),
            Err(error) if error.is_not_found() => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// Send a request, discarding any body.
    pub async fn send_empty(&self, builder: RequestBuilder, path: &str) -> Result<(), ApiError> {
        self.send(builder, path).await.map(|_| ())
    }

    async fn send(&self, builder: RequestBuilder, path: &str) -> Result<Response, ApiError> {
        let response = builder.send().await.map_err(|source| ApiError::Transport {
            path: path.to_string(),
            source,
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            path: path.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

/// Validate that a base URL is acceptable for use by a client.
///
/// `localhost` and `127.0.0.1` may use any scheme; every other host must use https.
pub fn validate_base_url(base: &str) -> Result<(), ApiError> {
    let invalid = |reason: String| ApiError::InvalidBaseUrl {
        url: base.to_string(),
        reason,
    };
    let parsed = Url::parse(base).map_err(|error| invalid(error.to_string()))?;
    let host_name = parsed.host_str().ok_or_else(|| invalid("URL must include a host".to_string()))?;

    if LOCALHOST_DOMAINS.iter().any(|&allowed| host_name.eq_ignore_ascii_case(allowed)) {
        return Ok(());
    }
    if parsed.scheme() != "https" {
        return Err(invalid(format!("non-localhost hosts must use https; got '{}://'", parsed.scheme())));
    }
    Ok(())
}

/// Percent-encode a single path segment.
pub(crate) fn encode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localhost_allows_plain_http() {
        assert!(validate_base_url("http://localhost:8080").is_ok());
        assert!(validate_base_url("http://127.0.0.1").is_ok());
    }

    #[test]
    fn remote_hosts_require_https() {
        assert!(validate_base_url("https://api.github.com").is_ok());
        let error = validate_base_url("http://api.example.com").unwrap_err();
        assert!(error.to_string().contains("https"));
        assert!(validate_base_url("not a url").is_err());
    }

    #[test]
    fn client_trims_trailing_slash() {
        let client = ApiClient::new("https://api.example.com/", "token", "application/json").expect("client");
        assert_eq!(client.base_url, "https://api.example.com");
    }

    #[test]
    fn encode_segment_escapes_spaces_and_slashes() {
        assert_eq!(encode_segment("my flag"), "my%20flag");
        assert_eq!(encode_segment("a/b"), "a%2Fb");
    }
}
