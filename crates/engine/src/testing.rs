//! In-memory fakes for the client seams with failure injection.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use demoforge_api::ApiError;
use demoforge_api::github::{FileContent, Repository};
use demoforge_api::unify::{AccessKey, CreatedObject, OrganizationProperty};
use demoforge_types::{FlagType, ResourceKind};
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

use crate::clients::{NewApplication, Platform, SourceHost};

fn rejected(path: &str) -> ApiError {
    ApiError::Status {
        path: path.to_string(),
        status: 422,
        body: "injected failure".into(),
    }
}

fn not_found(path: &str) -> ApiError {
    ApiError::Status {
        path: path.to_string(),
        status: 404,
        body: "Not Found".into(),
    }
}

#[derive(Default)]
struct HostState {
    next_id: u64,
    repositories: IndexMap<String, Repository>,
    files: HashMap<(String, String), String>,
    secrets: Vec<(String, String)>,
    deleted_repositories: Vec<String>,
    create_calls: usize,
}

/// Source host keeping repositories and files in memory. Repository creation yields to the
/// runtime before completing, so concurrent items overlap.
#[derive(Default)]
pub struct FakeSourceHost {
    state: Mutex<HostState>,
    failing_names: HashSet<String>,
    creates_in_flight: AtomicUsize,
    peak_creates: AtomicUsize,
}

impl FakeSourceHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository creation for `name` fails with a 422.
    pub fn failing_on(mut self, name: &str) -> Self {
        self.failing_names.insert(name.to_string());
        self
    }

    pub fn with_file(self, full_name: &str, path: &str, content: &str) -> Self {
        self.state
            .lock()
            .expect("fake lock poisoned")
            .files
            .insert((full_name.to_string(), path.to_string()), content.to_string());
        self
    }

    pub fn file(&self, full_name: &str, path: &str) -> Option<String> {
        self.state
            .lock()
            .expect("fake lock poisoned")
            .files
            .get(&(full_name.to_string(), path.to_string()))
            .cloned()
    }

    pub fn repository_names(&self) -> Vec<String> {
        self.state.lock().expect("fake lock poisoned").repositories.keys().cloned().collect()
    }

    pub fn create_calls(&self) -> usize {
        self.state.lock().expect("fake lock poisoned").create_calls
    }

    /// Most repository creations observed running at once.
    pub fn peak_concurrent_creates(&self) -> usize {
        self.peak_creates.load(Ordering::SeqCst)
    }

    pub fn secrets(&self) -> Vec<(String, String)> {
        self.state.lock().expect("fake lock poisoned").secrets.clone()
    }

    pub fn deleted_repositories(&self) -> Vec<String> {
        self.state.lock().expect("fake lock poisoned").deleted_repositories.clone()
    }
}

#[async_trait::async_trait]
impl SourceHost for FakeSourceHost {
    async fn find_repository(&self, owner: &str, name: &str) -> Result<Option<Repository>, ApiError> {
        let state = self.state.lock().expect("fake lock poisoned");
        Ok(state.repositories.get(&format!("{owner}/{name}")).cloned())
    }

    async fn create_repository_from_template(
        &self,
        _template: &str,
        owner: &str,
        name: &str,
        _description: Option<&str>,
        private: bool,
    ) -> Result<Repository, ApiError> {
        let running = self.creates_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_creates.fetch_max(running, Ordering::SeqCst);
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        self.creates_in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut state = self.state.lock().expect("fake lock poisoned");
        state.create_calls += 1;
        if self.failing_names.contains(name) {
            return Err(rejected(&format!("/repos/{owner}/{name}")));
        }
        state.next_id += 1;
        let repository = Repository {
            id: state.next_id,
            name: name.to_string(),
            full_name: format!("{owner}/{name}"),
            html_url: format!("https://github.test/{owner}/{name}"),
            private,
        };
        state.repositories.insert(repository.full_name.clone(), repository.clone());
        Ok(repository)
    }

    async fn read_file(&self, owner: &str, repo: &str, path: &str) -> Result<Option<FileContent>, ApiError> {
        let state = self.state.lock().expect("fake lock poisoned");
        Ok(state.files.get(&(format!("{owner}/{repo}"), path.to_string())).map(|content| FileContent {
            path: path.to_string(),
            sha: format!("sha-{}", content.len()),
            content: content.clone(),
        }))
    }

    async fn write_file(&self, owner: &str, repo: &str, path: &str, content: &str, _message: &str, _sha: Option<&str>) -> Result<(), ApiError> {
        let mut state = self.state.lock().expect("fake lock poisoned");
        state.files.insert((format!("{owner}/{repo}"), path.to_string()), content.to_string());
        Ok(())
    }

    async fn delete_path(&self, owner: &str, repo: &str, path: &str, _message: &str) -> Result<usize, ApiError> {
        let mut state = self.state.lock().expect("fake lock poisoned");
        let full_name = format!("{owner}/{repo}");
        let prefix = format!("{path}/");
        let before = state.files.len();
        state
            .files
            .retain(|(name, file), _| !(name == &full_name && (file == path || file.starts_with(&prefix))));
        Ok(before - state.files.len())
    }

    async fn create_encrypted_secret(&self, owner: &str, repo: &str, name: &str, _value: &str) -> Result<(), ApiError> {
        let mut state = self.state.lock().expect("fake lock poisoned");
        state.secrets.push((format!("{owner}/{repo}"), name.to_string()));
        Ok(())
    }

    async fn delete_repository(&self, owner: &str, name: &str) -> Result<bool, ApiError> {
        let mut state = self.state.lock().expect("fake lock poisoned");
        let full_name = format!("{owner}/{name}");
        let existed = state.repositories.shift_remove(&full_name).is_some();
        if existed {
            state.deleted_repositories.push(full_name);
        }
        Ok(existed)
    }
}

#[derive(Default)]
struct PlatformState {
    next_id: u64,
    objects: IndexMap<String, (ResourceKind, String)>,
    variables: Vec<(String, String, JsonValue, bool)>,
    applications: Vec<NewApplication>,
    flag_configurations: Vec<(String, String, bool, JsonValue)>,
    properties: HashMap<String, OrganizationProperty>,
    deletions: Vec<(ResourceKind, String)>,
}

/// Platform keeping created objects in memory.
#[derive(Default)]
pub struct FakePlatform {
    state: Mutex<PlatformState>,
    failing_names: HashSet<String>,
    failing_deletes: HashSet<String>,
    cancel_on: Option<(String, CancellationToken)>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creating an object named `name` fails with a 422.
    pub fn failing_on(mut self, name: &str) -> Self {
        self.failing_names.insert(name.to_string());
        self
    }

    /// Deleting the object named `name` fails with a 422.
    pub fn failing_delete_of(mut self, name: &str) -> Self {
        self.failing_deletes.insert(name.to_string());
        self
    }

    /// Cancel `token` once an object named `name` has been created.
    pub fn cancelling_after(mut self, name: &str, token: CancellationToken) -> Self {
        self.cancel_on = Some((name.to_string(), token));
        self
    }

    pub fn with_property(self, name: &str, secret: bool) -> Self {
        self.state.lock().expect("fake lock poisoned").properties.insert(
            name.to_string(),
            OrganizationProperty {
                name: name.to_string(),
                value: (!secret).then(|| "value".to_string()),
                secret,
            },
        );
        self
    }

    pub fn objects(&self, kind: ResourceKind) -> Vec<String> {
        self.state
            .lock()
            .expect("fake lock poisoned")
            .objects
            .values()
            .filter(|(object_kind, _)| *object_kind == kind)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Removes an object as if someone deleted it out of band.
    pub fn forget(&self, name: &str) {
        self.state
            .lock()
            .expect("fake lock poisoned")
            .objects
            .retain(|_, (_, object_name)| object_name != name);
    }

    pub fn variables(&self) -> Vec<(String, String, JsonValue, bool)> {
        self.state.lock().expect("fake lock poisoned").variables.clone()
    }

    pub fn applications(&self) -> Vec<NewApplication> {
        self.state.lock().expect("fake lock poisoned").applications.clone()
    }

    pub fn flag_configurations(&self) -> Vec<(String, String, bool, JsonValue)> {
        self.state.lock().expect("fake lock poisoned").flag_configurations.clone()
    }

    pub fn properties(&self) -> Vec<String> {
        let mut names: Vec<_> = self.state.lock().expect("fake lock poisoned").properties.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn deletions(&self) -> Vec<(ResourceKind, String)> {
        self.state.lock().expect("fake lock poisoned").deletions.clone()
    }

    fn create(&self, kind: ResourceKind, name: &str) -> Result<CreatedObject, ApiError> {
        if self.failing_names.contains(name) {
            return Err(rejected(&format!("/{kind}s/{name}")));
        }
        let mut state = self.state.lock().expect("fake lock poisoned");
        state.next_id += 1;
        let id = format!("{}-{}", kind.as_str(), state.next_id);
        state.objects.insert(id.clone(), (kind, name.to_string()));
        drop(state);
        if let Some((trigger, token)) = &self.cancel_on
            && trigger == name
        {
            token.cancel();
        }
        Ok(CreatedObject {
            url: Some(format!("https://unify.test/{}", id)),
            id,
            name: Some(name.to_string()),
        })
    }
}

#[async_trait::async_trait]
impl Platform for FakePlatform {
    async fn create_component(&self, _org_id: &str, name: &str, _repository_url: &str) -> Result<CreatedObject, ApiError> {
        self.create(ResourceKind::Component, name)
    }

    async fn create_environment(&self, _org_id: &str, name: &str, _description: Option<&str>) -> Result<CreatedObject, ApiError> {
        self.create(ResourceKind::Environment, name)
    }

    async fn set_environment_variable(&self, _org_id: &str, environment_id: &str, name: &str, value: &JsonValue, secret: bool) -> Result<(), ApiError> {
        if self.failing_names.contains(name) {
            return Err(rejected(&format!("/environments/{environment_id}/variables/{name}")));
        }
        let mut state = self.state.lock().expect("fake lock poisoned");
        state
            .variables
            .push((environment_id.to_string(), name.to_string(), value.clone(), secret));
        Ok(())
    }

    async fn mint_access_key(&self, _org_id: &str, environment_id: &str) -> Result<AccessKey, ApiError> {
        Ok(AccessKey {
            id: format!("key-{environment_id}"),
            key: format!("fm-secret-{environment_id}"),
        })
    }

    async fn create_application(&self, _org_id: &str, application: &NewApplication) -> Result<CreatedObject, ApiError> {
        let created = self.create(ResourceKind::Application, &application.name)?;
        self.state
            .lock()
            .expect("fake lock poisoned")
            .applications
            .push(application.clone());
        Ok(created)
    }

    async fn create_flag(&self, _org_id: &str, name: &str, _flag_type: FlagType, _description: Option<&str>) -> Result<CreatedObject, ApiError> {
        self.create(ResourceKind::Flag, name)
    }

    async fn set_flag_configuration(&self, _org_id: &str, flag_id: &str, environment_id: &str, enabled: bool, default_value: &JsonValue) -> Result<(), ApiError> {
        let mut state = self.state.lock().expect("fake lock poisoned");
        state
            .flag_configurations
            .push((flag_id.to_string(), environment_id.to_string(), enabled, default_value.clone()));
        Ok(())
    }

    async fn get_organization_property(&self, _org_id: &str, name: &str) -> Result<Option<OrganizationProperty>, ApiError> {
        Ok(self.state.lock().expect("fake lock poisoned").properties.get(name).cloned())
    }

    async fn create_organization_property(&self, _org_id: &str, name: &str, _value: &str, secret: bool) -> Result<(), ApiError> {
        self.state.lock().expect("fake lock poisoned").properties.insert(
            name.to_string(),
            OrganizationProperty {
                name: name.to_string(),
                value: None,
                secret,
            },
        );
        Ok(())
    }

    async fn delete_resource(&self, _org_id: &str, kind: ResourceKind, id: &str) -> Result<bool, ApiError> {
        let mut state = self.state.lock().expect("fake lock poisoned");
        let Some((_, name)) = state.objects.get(id).cloned() else {
            return Err(not_found(&format!("/{kind}s/{id}")));
        };
        if self.failing_deletes.contains(&name) {
            return Err(rejected(&format!("/{kind}s/{id}")));
        }
        state.objects.shift_remove(id);
        state.deletions.push((kind, name));
        Ok(true)
    }
}
