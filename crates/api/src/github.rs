//! GitHub-compatible source-host client.
//!
//! Covers the calls a scenario run needs: generating repositories from template
//! repositories, reading and rewriting files through the contents API, uploading Actions
//! secrets sealed with the repository public key, and the listing endpoints used by the CLI.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::{ApiClient, ApiError, CredentialSource, Service, encode_segment};

const GITHUB_ACCEPT: &str = "application/vnd.github+json";

/// Repository as returned by the source host.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Repository {
    pub id: u64,
    pub name: String,
    pub full_name: String,
    pub html_url: String,
    #[serde(default)]
    pub private: bool,
}

/// Decoded file plus the blob sha needed to update or delete it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub path: String,
    pub sha: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Branch {
    pub name: String,
    #[serde(default)]
    pub protected: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub html_url: String,
    pub state: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ContentEntry {
    path: String,
    sha: String,
    #[serde(rename = "type")]
    entry_type: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ContentsResponse {
    Directory(Vec<ContentEntry>),
    File(ContentEntry),
}

#[derive(Debug, Clone, Deserialize)]
struct ActionsPublicKey {
    key_id: String,
    key: String,
}

/// Client for the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GithubClient {
    api: ApiClient,
}

impl GithubClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self, ApiError> {
        Ok(Self {
            api: ApiClient::new(base_url, token, GITHUB_ACCEPT)?,
        })
    }

    /// Build a client from a credential source.
    pub fn from_credentials(base_url: &str, credentials: &dyn CredentialSource) -> Result<Self, ApiError> {
        let token = credentials.token(Service::SourceHost).ok_or(ApiError::MissingCredentials {
            env_var: Service::SourceHost.token_env_var(),
        })?;
        Self::new(base_url, &token)
    }

    pub fn base_url(&self) -> &str {
        &self.api.base_url
    }

    /// Look up a repository; `None` when it does not exist.
    pub async fn get_repository(&self, owner: &str, name: &str) -> Result<Option<Repository>, ApiError> {
        let path = repo_path(owner, name);
        let builder = self.api.request(Method::GET, &path);
        self.api.send_optional_json(builder, &path).await
    }

    /// Generate `owner/name` from a template repository given as `template_owner/template_repo`.
    pub async fn generate_from_template(
        &self,
        template: &str,
        owner: &str,
        name: &str,
        description: Option<&str>,
        private: bool,
    ) -> Result<Repository, ApiError> {
        let (template_owner, template_repo) = split_full_name(template)?;
        let path = format!("{}/generate", repo_path(template_owner, template_repo));
        let body = json!({
            "owner": owner,
            "name": name,
            "description": description,
            "private": private,
            "include_all_branches": false,
        });
        let builder = self.api.request(Method::POST, &path).json(&body);
        self.api.send_json(builder, &path).await
    }

    /// Read and decode a single file; `None` when the path does not exist.
    pub async fn get_file(&self, owner: &str, repo: &str, file_path: &str) -> Result<Option<FileContent>, ApiError> {
        let path = contents_path(owner, repo, file_path);
        let builder = self.api.request(Method::GET, &path);
        let Some(response) = self.api.send_optional_json::<ContentsResponse>(builder, &path).await? else {
            return Ok(None);
        };
        match response {
            ContentsResponse::File(entry) => {
                let encoded = entry.content.unwrap_or_default();
                let content = decode_content(&encoded).map_err(|reason| ApiError::Decode { path: path.clone(), reason })?;
                Ok(Some(FileContent {
                    path: entry.path,
                    sha: entry.sha,
                    content,
                }))
            }
            ContentsResponse::Directory(_) => Err(ApiError::Decode {
                path,
                reason: format!("'{}' is a directory", file_path),
            }),
        }
    }

    /// Create or update a file. `sha` must be the current blob sha when updating.
    pub async fn put_file(&self, owner: &str, repo: &str, file_path: &str, content: &str, message: &str, sha: Option<&str>) -> Result<(), ApiError> {
        let path = contents_path(owner, repo, file_path);
        let mut body = json!({
            "message": message,
            "content": STANDARD.encode(content.as_bytes()),
        });
        if let Some(sha) = sha {
            body["sha"] = json!(sha);
        }
        let builder = self.api.request(Method::PUT, &path).json(&body);
        self.api.send_empty(builder, &path).await
    }

    /// Delete a file, or every file below a directory. Returns the number of files removed.
    pub async fn delete_path(&self, owner: &str, repo: &str, target: &str, message: &str) -> Result<usize, ApiError> {
        let mut pending = vec![target.to_string()];
        let mut removed = 0;
        while let Some(current) = pending.pop() {
            let path = contents_path(owner, repo, &current);
            let builder = self.api.request(Method::GET, &path);
            let Some(response) = self.api.send_optional_json::<ContentsResponse>(builder, &path).await? else {
                continue;
            };
            let entries = match response {
                ContentsResponse::File(entry) => vec![entry],
                ContentsResponse::Directory(entries) => entries,
            };
            for entry in entries {
                if entry.entry_type == "dir" {
                    pending.push(entry.path);
                    continue;
                }
                self.delete_file(owner, repo, &entry.path, &entry.sha, message).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn delete_file(&self, owner: &str, repo: &str, file_path: &str, sha: &str, message: &str) -> Result<(), ApiError> {
        let path = contents_path(owner, repo, file_path);
        let body = json!({ "message": message, "sha": sha });
        let builder = self.api.request(Method::DELETE, &path).json(&body);
        self.api.send_empty(builder, &path).await
    }

    /// Seal `value` with the repository's Actions public key and upload it.
    pub async fn create_encrypted_secret(&self, owner: &str, repo: &str, name: &str, value: &str) -> Result<(), ApiError> {
        let key_path = format!("{}/actions/secrets/public-key", repo_path(owner, repo));
        let builder = self.api.request(Method::GET, &key_path);
        let public_key: ActionsPublicKey = self.api.send_json(builder, &key_path).await?;

        let encrypted_value = seal_secret(name, &public_key.key, value)?;
        let path = format!("{}/actions/secrets/{}", repo_path(owner, repo), encode_segment(name));
        debug!(secret = name, repository = %format!("{}/{}", owner, repo), "uploading sealed secret");
        let body = json!({ "encrypted_value": encrypted_value, "key_id": public_key.key_id });
        let builder = self.api.request(Method::PUT, &path).json(&body);
        self.api.send_empty(builder, &path).await
    }

    /// Delete a repository. Returns `false` when it was already gone.
    pub async fn delete_repository(&self, owner: &str, name: &str) -> Result<bool, ApiError> {
        let path = repo_path(owner, name);
        let builder = self.api.request(Method::DELETE, &path);
        match self.api.send_empty(builder, &path).await {
            Ok(()) => Ok(true),
            Err(error) if error.is_not_found() => Ok(false),
            Err(error) => Err(error),
        }
    }

    pub async fn list_branches(&self, owner: &str, repo: &str) -> Result<Vec<Branch>, ApiError> {
        let path = format!("{}/branches", repo_path(owner, repo));
        let builder = self.api.request(Method::GET, &path).query(&[("per_page", "100")]);
        self.api.send_json(builder, &path).await
    }

    pub async fn list_open_pull_requests(&self, owner: &str, repo: &str) -> Result<Vec<PullRequest>, ApiError> {
        let path = format!("{}/pulls", repo_path(owner, repo));
        let builder = self.api.request(Method::GET, &path).query(&[("state", "open"), ("per_page", "100")]);
        self.api.send_json(builder, &path).await
    }
}

/// Split `owner/name` into its parts.
pub fn split_full_name(full_name: &str) -> Result<(&str, &str), ApiError> {
    match full_name.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => Ok((owner, name)),
        _ => Err(ApiError::Decode {
            path: full_name.to_string(),
            reason: "expected a repository in owner/name form".to_string(),
        }),
    }
}

/// Encrypt a secret value as a libsodium sealed box for the given base64 public key.
pub fn seal_secret(name: &str, public_key_b64: &str, value: &str) -> Result<String, ApiError> {
    let encryption_error = |reason: String| ApiError::Encryption {
        name: name.to_string(),
        reason,
    };
    let key_bytes = STANDARD.decode(public_key_b64.trim()).map_err(|error| encryption_error(error.to_string()))?;
    let key_array: [u8; crypto_box::KEY_SIZE] = key_bytes
        .as_slice()
        .try_into()
        .map_err(|_| encryption_error(format!("public key must be {} bytes, got {}", crypto_box::KEY_SIZE, key_bytes.len())))?;
    let public_key = crypto_box::PublicKey::from(key_array);
    let sealed = public_key
        .seal(&mut crypto_box::aead::OsRng, value.as_bytes())
        .map_err(|error| encryption_error(error.to_string()))?;
    Ok(STANDARD.encode(sealed))
}

fn repo_path(owner: &str, name: &str) -> String {
    format!("/repos/{}/{}", encode_segment(owner), encode_segment(name))
}

fn contents_path(owner: &str, repo: &str, file_path: &str) -> String {
    let encoded: Vec<String> = file_path.trim_matches('/').split('/').map(encode_segment).collect();
    format!("{}/contents/{}", repo_path(owner, repo), encoded.join("/"))
}

/// The contents API wraps base64 at 60 columns.
fn decode_content(encoded: &str) -> Result<String, String> {
    let compact: String = encoded.chars().filter(|character| !character.is_whitespace()).collect();
    let bytes = STANDARD.decode(compact).map_err(|error| error.to_string())?;
    String::from_utf8(bytes).map_err(|error| error.to_string())
}
