//! Client seams used by the pipeline, cleanup, and pre-flight checks.
//!
//! The engine talks to the source host and the platform only through these traits so runs can
//! be driven against the real HTTP clients, the dry-run no-op clients, or test fakes.

use std::sync::atomic::{AtomicU64, Ordering};

use demoforge_api::github::{FileContent, Repository};
use demoforge_api::unify::{AccessKey, CreatedObject, OrganizationProperty};
use demoforge_api::{ApiError, GithubClient, UnifyClient};
use demoforge_types::{FlagType, ResourceKind};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Source-code host operations.
#[async_trait::async_trait]
pub trait SourceHost: Send + Sync {
    async fn find_repository(&self, owner: &str, name: &str) -> Result<Option<Repository>, ApiError>;

    /// Generate `owner/name` from `template` (`owner/repository`).
    async fn create_repository_from_template(
        &self,
        template: &str,
        owner: &str,
        name: &str,
        description: Option<&str>,
        private: bool,
    ) -> Result<Repository, ApiError>;

    async fn read_file(&self, owner: &str, repo: &str, path: &str) -> Result<Option<FileContent>, ApiError>;

    /// Create or update a file. `sha` is the blob being replaced, if any.
    async fn write_file(&self, owner: &str, repo: &str, path: &str, content: &str, message: &str, sha: Option<&str>) -> Result<(), ApiError>;

    /// Delete a file or a directory tree; returns the number of files removed.
    async fn delete_path(&self, owner: &str, repo: &str, path: &str, message: &str) -> Result<usize, ApiError>;

    async fn create_encrypted_secret(&self, owner: &str, repo: &str, name: &str, value: &str) -> Result<(), ApiError>;

    /// Returns `false` when the repository was already gone.
    async fn delete_repository(&self, owner: &str, name: &str) -> Result<bool, ApiError>;
}

/// Application creation payload; components and environments are platform ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewApplication {
    pub name: String,
    pub description: Option<String>,
    pub repository_url: Option<String>,
    pub component_ids: Vec<String>,
    pub environment_ids: Vec<String>,
}

/// Deployment and flag-management platform operations.
#[async_trait::async_trait]
pub trait Platform: Send + Sync {
    async fn create_component(&self, org_id: &str, name: &str, repository_url: &str) -> Result<CreatedObject, ApiError>;

    async fn create_environment(&self, org_id: &str, name: &str, description: Option<&str>) -> Result<CreatedObject, ApiError>;

    async fn set_environment_variable(&self, org_id: &str, environment_id: &str, name: &str, value: &JsonValue, secret: bool) -> Result<(), ApiError>;

    async fn mint_access_key(&self, org_id: &str, environment_id: &str) -> Result<AccessKey, ApiError>;

    async fn create_application(&self, org_id: &str, application: &NewApplication) -> Result<CreatedObject, ApiError>;

    async fn create_flag(&self, org_id: &str, name: &str, flag_type: FlagType, description: Option<&str>) -> Result<CreatedObject, ApiError>;

    async fn set_flag_configuration(&self, org_id: &str, flag_id: &str, environment_id: &str, enabled: bool, default_value: &JsonValue) -> Result<(), ApiError>;

    async fn get_organization_property(&self, org_id: &str, name: &str) -> Result<Option<OrganizationProperty>, ApiError>;

    async fn create_organization_property(&self, org_id: &str, name: &str, value: &str, secret: bool) -> Result<(), ApiError>;

    /// Returns `false` when the object was already gone.
    async fn delete_resource(&self, org_id: &str, kind: ResourceKind, id: &str) -> Result<bool, ApiError>;
}

#[async_trait::async_trait]
impl SourceHost for GithubClient {
    async fn find_repository(&self, owner: &str, name: &str) -> Result<Option<Repository>, ApiError> {
        self.get_repository(owner, name).await
    }

    async fn create_repository_from_template(
        &self,
        template: &str,
        owner: &str,
        name: &str,
        description: Option<&str>,
        private: bool,
    ) -> Result<Repository, ApiError> {
        self.generate_from_template(template, owner, name, description, private).await
    }

    async fn read_file(&self, owner: &str, repo: &str, path: &str) -> Result<Option<FileContent>, ApiError> {
        self.get_file(owner, repo, path).await
    }

    async fn write_file(&self, owner: &str, repo: &str, path: &str, content: &str, message: &str, sha: Option<&str>) -> Result<(), ApiError> {
        self.put_file(owner, repo, path, content, message, sha).await
    }

    async fn delete_path(&self, owner: &str, repo: &str, path: &str, message: &str) -> Result<usize, ApiError> {
        GithubClient::delete_path(self, owner, repo, path, message).await
    }

    async fn create_encrypted_secret(&self, owner: &str, repo: &str, name: &str, value: &str) -> Result<(), ApiError> {
        GithubClient::create_encrypted_secret(self, owner, repo, name, value).await
    }

    async fn delete_repository(&self, owner: &str, name: &str) -> Result<bool, ApiError> {
        GithubClient::delete_repository(self, owner, name).await
    }
}

#[async_trait::async_trait]
impl Platform for UnifyClient {
    async fn create_component(&self, org_id: &str, name: &str, repository_url: &str) -> Result<CreatedObject, ApiError> {
        UnifyClient::create_component(self, org_id, name, repository_url).await
    }

    async fn create_environment(&self, org_id: &str, name: &str, description: Option<&str>) -> Result<CreatedObject, ApiError> {
        UnifyClient::create_environment(self, org_id, name, description).await
    }

    async fn set_environment_variable(&self, org_id: &str, environment_id: &str, name: &str, value: &JsonValue, secret: bool) -> Result<(), ApiError> {
        UnifyClient::set_environment_variable(self, org_id, environment_id, name, value, secret).await
    }

    async fn mint_access_key(&self, org_id: &str, environment_id: &str) -> Result<AccessKey, ApiError> {
        UnifyClient::mint_access_key(self, org_id, environment_id).await
    }

    async fn create_application(&self, org_id: &str, application: &NewApplication) -> Result<CreatedObject, ApiError> {
        UnifyClient::create_application(
            self,
            org_id,
            &application.name,
            application.description.as_deref(),
            application.repository_url.as_deref(),
            &application.component_ids,
            &application.environment_ids,
        )
        .await
    }

    async fn create_flag(&self, org_id: &str, name: &str, flag_type: FlagType, description: Option<&str>) -> Result<CreatedObject, ApiError> {
        UnifyClient::create_flag(self, org_id, name, flag_type, description).await
    }

    async fn set_flag_configuration(&self, org_id: &str, flag_id: &str, environment_id: &str, enabled: bool, default_value: &JsonValue) -> Result<(), ApiError> {
        UnifyClient::set_flag_configuration(self, org_id, flag_id, environment_id, enabled, default_value).await
    }

    async fn get_organization_property(&self, org_id: &str, name: &str) -> Result<Option<OrganizationProperty>, ApiError> {
        UnifyClient::get_organization_property(self, org_id, name).await
    }

    async fn create_organization_property(&self, org_id: &str, name: &str, value: &str, secret: bool) -> Result<(), ApiError> {
        UnifyClient::create_organization_property(self, org_id, name, value, secret).await
    }

    async fn delete_resource(&self, org_id: &str, kind: ResourceKind, id: &str) -> Result<bool, ApiError> {
        self.delete(org_id, kind, id).await
    }
}

/// Prefix of identifiers synthesized by the dry-run clients.
pub const DRY_RUN_ID_PREFIX: &str = "dry-";

fn dry_run_id() -> String {
    format!("{DRY_RUN_ID_PREFIX}{}", Uuid::new_v4())
}

/// Source host that performs no external calls. Every repository is reported as new and
/// every file as empty.
#[derive(Debug, Default)]
pub struct NoopSourceHost {
    next_id: AtomicU64,
}

impl NoopSourceHost {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SourceHost for NoopSourceHost {
    async fn find_repository(&self, _owner: &str, _name: &str) -> Result<Option<Repository>, ApiError> {
        Ok(None)
    }

    async fn create_repository_from_template(
        &self,
        _template: &str,
        owner: &str,
        name: &str,
        _description: Option<&str>,
        private: bool,
    ) -> Result<Repository, ApiError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Repository {
            id,
            name: name.to_string(),
            full_name: format!("{owner}/{name}"),
            html_url: format!("dry-run://{owner}/{name}"),
            private,
        })
    }

    async fn read_file(&self, _owner: &str, _repo: &str, path: &str) -> Result<Option<FileContent>, ApiError> {
        Ok(Some(FileContent {
            path: path.to_string(),
            sha: dry_run_id(),
            content: String::new(),
        }))
    }

    async fn write_file(&self, _owner: &str, _repo: &str, _path: &str, _content: &str, _message: &str, _sha: Option<&str>) -> Result<(), ApiError> {
        Ok(())
    }

    async fn delete_path(&self, _owner: &str, _repo: &str, _path: &str, _message: &str) -> Result<usize, ApiError> {
        Ok(1)
    }

    async fn create_encrypted_secret(&self, _owner: &str, _repo: &str, _name: &str, _value: &str) -> Result<(), ApiError> {
        Ok(())
    }

    async fn delete_repository(&self, _owner: &str, _name: &str) -> Result<bool, ApiError> {
        Ok(true)
    }
}

/// Platform that performs no external calls and synthesizes `dry-` identifiers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPlatform;

impl NoopPlatform {
    fn created(name: &str) -> CreatedObject {
        CreatedObject {
            id: dry_run_id(),
            name: Some(name.to_string()),
            url: None,
        }
    }
}

#[async_trait::async_trait]
impl Platform for NoopPlatform {
    async fn create_component(&self, _org_id: &str, name: &str, _repository_url: &str) -> Result<CreatedObject, ApiError> {
        Ok(Self::created(name))
    }

    async fn create_environment(&self, _org_id: &str, name: &str, _description: Option<&str>) -> Result<CreatedObject, ApiError> {
        Ok(Self::created(name))
    }

    async fn set_environment_variable(&self, _org_id: &str, _environment_id: &str, _name: &str, _value: &JsonValue, _secret: bool) -> Result<(), ApiError> {
        Ok(())
    }

    async fn mint_access_key(&self, _org_id: &str, _environment_id: &str) -> Result<AccessKey, ApiError> {
        Ok(AccessKey {
            id: dry_run_id(),
            key: String::from("dry-run-key"),
        })
    }

    async fn create_application(&self, _org_id: &str, application: &NewApplication) -> Result<CreatedObject, ApiError> {
        Ok(Self::created(&application.name))
    }

    async fn create_flag(&self, _org_id: &str, name: &str, _flag_type: FlagType, _description: Option<&str>) -> Result<CreatedObject, ApiError> {
        Ok(Self::created(name))
    }

    async fn set_flag_configuration(&self, _org_id: &str, _flag_id: &str, _environment_id: &str, _enabled: bool, _default_value: &JsonValue) -> Result<(), ApiError> {
        Ok(())
    }

    async fn get_organization_property(&self, _org_id: &str, _name: &str) -> Result<Option<OrganizationProperty>, ApiError> {
        Ok(None)
    }

    async fn create_organization_property(&self, _org_id: &str, _name: &str, _value: &str, _secret: bool) -> Result<(), ApiError> {
        Ok(())
    }

    async fn delete_resource(&self, _org_id: &str, _kind: ResourceKind, _id: &str) -> Result<bool, ApiError> {
        Ok(true)
    }
}
