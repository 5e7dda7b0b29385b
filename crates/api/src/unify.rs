//! Unify platform client: components, environments, applications, flags, and
//! organization properties. Every call is scoped to `/v1/organizations/{org}`.

use demoforge_types::{FlagType, ResourceKind};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use crate::{ApiClient, ApiError, CredentialSource, Service, encode_segment};

const UNIFY_ACCEPT: &str = "application/json";

/// Identifier (and optional URL) of a newly created platform object.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreatedObject {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Access key minted for one environment.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccessKey {
    pub id: String,
    pub key: String,
}

/// Organization-scoped property or secret. Secret values are never returned.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationProperty {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub secret: bool,
}

/// Client for the Unify REST API.
#[derive(Debug, Clone)]
pub struct UnifyClient {
    api: ApiClient,
}

impl UnifyClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self, ApiError> {
        Ok(Self {
            api: ApiClient::new(base_url, token, UNIFY_ACCEPT)?,
        })
    }

    pub fn from_credentials(base_url: &str, credentials: &dyn CredentialSource) -> Result<Self, ApiError> {
        let token = credentials.token(Service::Platform).ok_or(ApiError::MissingCredentials {
            env_var: Service::Platform.token_env_var(),
        })?;
        Self::new(base_url, &token)
    }

    pub fn base_url(&self) -> &str {
        &self.api.base_url
    }

    pub async fn create_component(&self, org_id: &str, name: &str, repository_url: &str) -> Result<CreatedObject, ApiError> {
        let body = json!({ "name": name, "repositoryUrl": repository_url });
        self.post(org_id, "components", &body).await
    }

    pub async fn create_environment(&self, org_id: &str, name: &str, description: Option<&str>) -> Result<CreatedObject, ApiError> {
        let body = json!({ "name": name, "description": description });
        self.post(org_id, "environments", &body).await
    }

    pub async fn set_environment_variable(&self, org_id: &str, environment_id: &str, name: &str, value: &JsonValue, secret: bool) -> Result<(), ApiError> {
        let path = org_path(org_id, &format!("environments/{}/variables", encode_segment(environment_id)));
        let body = json!({ "name": name, "value": value, "secret": secret });
        let builder = self.api.request(Method::POST, &path).json(&body);
        self.api.send_empty(builder, &path).await
    }

    /// Mint an access key scoped to a single environment.
    pub async fn mint_access_key(&self, org_id: &str, environment_id: &str) -> Result<AccessKey, ApiError> {
        let path = org_path(org_id, &format!("environments/{}/access-keys", encode_segment(environment_id)));
        let builder = self.api.request(Method::POST, &path).json(&json!({}));
        self.api.send_json(builder, &path).await
    }

    pub async fn create_application(
        &self,
        org_id: &str,
        name: &str,
        description: Option<&str>,
        repository_url: Option<&str>,
        component_ids: &[String],
        environment_ids: &[String],
    ) -> Result<CreatedObject, ApiError> {
        let body = json!({
            "name": name,
            "description": description,
            "repositoryUrl": repository_url,
            "componentIds": component_ids,
            "environmentIds": environment_ids,
        });
        self.post(org_id, "applications", &body).await
    }

    pub async fn create_flag(&self, org_id: &str, name: &str, flag_type: FlagType, description: Option<&str>) -> Result<CreatedObject, ApiError> {
        let body = json!({ "name": name, "type": flag_type.as_str(), "description": description });
        self.post(org_id, "flags", &body).await
    }

    /// Configure a flag in one environment. Targeting conditions are always empty.
    pub async fn set_flag_configuration(&self, org_id: &str, flag_id: &str, environment_id: &str, enabled: bool, default_value: &JsonValue) -> Result<(), ApiError> {
        let path = org_path(
            org_id,
            &format!("flags/{}/configurations/{}", encode_segment(flag_id), encode_segment(environment_id)),
        );
        let body = json!({ "enabled": enabled, "defaultValue": default_value, "conditions": [] });
        let builder = self.api.request(Method::PUT, &path).json(&body);
        self.api.send_empty(builder, &path).await
    }

    /// Fetch an organization property or secret; `None` when it does not exist.
    pub async fn get_organization_property(&self, org_id: &str, name: &str) -> Result<Option<OrganizationProperty>, ApiError> {
        let path = org_path(org_id, &format!("properties/{}", encode_segment(name)));
        let builder = self.api.request(Method::GET, &path);
        self.api.send_optional_json(builder, &path).await
    }

    pub async fn create_organization_property(&self, org_id: &str, name: &str, value: &str, secret: bool) -> Result<(), ApiError> {
        let path = org_path(org_id, "properties");
        let body = json!({ "name": name, "value": value, "secret": secret });
        let builder = self.api.request(Method::POST, &path).json(&body);
        self.api.send_empty(builder, &path).await
    }

    /// Delete a platform object. Returns `false` when it was already gone.
    pub async fn delete(&self, org_id: &str, kind: ResourceKind, id: &str) -> Result<bool, ApiError> {
        let collection = collection_for(kind).ok_or_else(|| ApiError::Decode {
            path: id.to_string(),
            reason: format!("{} objects are not managed by the platform", kind),
        })?;
        let path = org_path(org_id, &format!("{}/{}", collection, encode_segment(id)));
        let builder = self.api.request(Method::DELETE, &path);
        match self.api.send_empty(builder, &path).await {
            Ok(()) => Ok(true),
            Err(error) if error.is_not_found() => Ok(false),
            Err(error) => Err(error),
        }
    }

    async fn post(&self, org_id: &str, collection: &str, body: &JsonValue) -> Result<CreatedObject, ApiError> {
        let path = org_path(org_id, collection);
        let builder = self.api.request(Method::POST, &path).json(body);
        self.api.send_json(builder, &path).await
    }
}

fn org_path(org_id: &str, suffix: &str) -> String {
    format!("/v1/organizations/{}/{}", encode_segment(org_id), suffix)
}

fn collection_for(kind: ResourceKind) -> Option<&'static str> {
    match kind {
        ResourceKind::Component => Some("components"),
        ResourceKind::Environment => Some("environments"),
        ResourceKind::Application => Some("applications"),
        ResourceKind::Flag => Some("flags"),
        ResourceKind::Repository => None,
    }
}
