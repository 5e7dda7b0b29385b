//! Configuration file for the engine and its command-line front end.
//!
//! The file lives at `<config_dir>/demoforge/config.json` unless `DEMOFORGE_CONFIG_PATH`
//! points elsewhere. A missing file yields defaults; a malformed file is logged and ignored
//! so a bad edit never locks the user out of cleanup.
//!
//! Environment targets decide what `${env.*}` references resolve to. The built-in
//! `production` and `staging` presets are always available; entries under `environments`
//! override a preset field by field or declare new custom targets.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::path_processing::{demoforge_config_dir, expand_tilde};

/// Environment variable overriding the configuration file location.
pub const CONFIG_PATH_ENV: &str = "DEMOFORGE_CONFIG_PATH";
/// Environment variable overriding the source-host API base URL.
pub const GITHUB_API_BASE_ENV: &str = "GITHUB_API_BASE";

pub const CONFIG_FILE_NAME: &str = "config.json";
pub const SESSIONS_FILE_NAME: &str = "sessions.json";
pub const DEFAULT_GITHUB_API_BASE: &str = "https://api.github.com";
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 4;
pub const DEFAULT_TTL_DAYS: u32 = 7;
pub const DEFAULT_ENVIRONMENT: &str = "production";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown environment target '{name}' (available: {available})")]
    UnknownEnvironment { name: String, available: String },
}

/// Platform endpoint and properties exposed to scenarios as `${env.*}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentTarget {
    /// Base URL of the Unify API, exposed as `env.UNIFY_API`.
    #[serde(default)]
    pub unify_api: String,
    /// Flag-evaluation endpoint identifier, exposed as `env.ENDPOINT_ID`.
    #[serde(default)]
    pub endpoint_id: String,
    /// Additional `env.*` properties, added verbatim.
    #[serde(default)]
    pub properties: IndexMap<String, String>,
}

impl EnvironmentTarget {
    /// Overlay non-empty fields of `custom` onto `self`.
    fn merged_with(mut self, custom: &EnvironmentTarget) -> Self {
        if !custom.unify_api.trim().is_empty() {
            self.unify_api = custom.unify_api.clone();
        }
        if !custom.endpoint_id.trim().is_empty() {
            self.endpoint_id = custom.endpoint_id.clone();
        }
        for (name, value) in &custom.properties {
            self.properties.insert(name.clone(), value.clone());
        }
        self
    }
}

/// Persisted configuration values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DemoforgeConfig {
    /// Directory holding scenario definitions.
    #[serde(default)]
    pub scenarios_dir: Option<String>,
    /// JSON file backing the session store.
    #[serde(default)]
    pub sessions_path: Option<String>,
    /// Maximum concurrent items within one phase.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    #[serde(default = "default_ttl_days")]
    pub default_ttl_days: u32,
    #[serde(default = "default_environment")]
    pub default_environment: String,
    /// Source-host base URL; `GITHUB_API_BASE` takes precedence.
    #[serde(default)]
    pub github_api_base: Option<String>,
    /// Account that owns generated repositories when a run does not name one.
    #[serde(default)]
    pub github_owner: Option<String>,
    /// Custom environment targets and preset overrides.
    #[serde(default)]
    pub environments: IndexMap<String, EnvironmentTarget>,
}

impl Default for DemoforgeConfig {
    fn default() -> Self {
        Self {
            scenarios_dir: None,
            sessions_path: None,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            default_ttl_days: DEFAULT_TTL_DAYS,
            default_environment: default_environment(),
            github_api_base: None,
            github_owner: None,
            environments: IndexMap::new(),
        }
    }
}

impl DemoforgeConfig {
    pub fn scenarios_dir(&self) -> PathBuf {
        match self.scenarios_dir.as_deref() {
            Some(path) if !path.trim().is_empty() => expand_tilde(path),
            _ => demoforge_config_dir().join("scenarios"),
        }
    }

    pub fn sessions_path(&self) -> PathBuf {
        match self.sessions_path.as_deref() {
            Some(path) if !path.trim().is_empty() => expand_tilde(path),
            _ => demoforge_config_dir().join(SESSIONS_FILE_NAME),
        }
    }

    /// Concurrency limit clamped to at least one.
    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit.max(1)
    }

    pub fn github_api_base(&self) -> String {
        if let Ok(base) = env::var(GITHUB_API_BASE_ENV)
            && !base.trim().is_empty()
        {
            return base.trim().to_string();
        }
        self.github_api_base
            .clone()
            .filter(|base| !base.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_GITHUB_API_BASE.to_string())
    }

    /// Names of every selectable environment target, presets first.
    pub fn environment_names(&self) -> Vec<String> {
        let mut names: Vec<String> = preset_targets().into_keys().collect();
        for name in self.environments.keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }

    /// Resolve an environment target, defaulting to `default_environment`.
    pub fn environment(&self, name: Option<&str>) -> Result<EnvironmentTarget, ConfigError> {
        let name = name.unwrap_or(&self.default_environment);
        let preset = preset_targets().shift_remove(name);
        let custom = self.environments.get(name);
        match (preset, custom) {
            (Some(preset), Some(custom)) => Ok(preset.merged_with(custom)),
            (Some(preset), None) => Ok(preset),
            (None, Some(custom)) => Ok(custom.clone()),
            (None, None) => Err(ConfigError::UnknownEnvironment {
                name: name.to_string(),
                available: self.environment_names().join(", "),
            }),
        }
    }
}

/// Built-in environment targets.
pub fn preset_targets() -> IndexMap<String, EnvironmentTarget> {
    let mut presets = IndexMap::new();
    presets.insert(
        "production".to_string(),
        EnvironmentTarget {
            unify_api: "https://api.unify.io".to_string(),
            endpoint_id: "prod".to_string(),
            properties: IndexMap::new(),
        },
    );
    presets.insert(
        "staging".to_string(),
        EnvironmentTarget {
            unify_api: "https://api.staging.unify.io".to_string(),
            endpoint_id: "staging".to_string(),
            properties: IndexMap::new(),
        },
    );
    presets
}

/// Load configuration from the default location.
pub fn load_config() -> Result<DemoforgeConfig, ConfigError> {
    load_config_from(&default_config_path())
}

/// Load configuration from an explicit path; a missing file yields defaults.
pub fn load_config_from(path: &Path) -> Result<DemoforgeConfig, ConfigError> {
    match fs::read_to_string(path) {
        Ok(data) => match serde_json::from_str(&data) {
            Ok(config) => Ok(config),
            Err(error) => {
                warn!(path = %path.display(), error = %error, "Failed to parse config file; using defaults");
                Ok(DemoforgeConfig::default())
            }
        },
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(DemoforgeConfig::default()),
        Err(error) => Err(ConfigError::Io(error)),
    }
}

pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }
    demoforge_config_dir().join(CONFIG_FILE_NAME)
}

fn default_concurrency_limit() -> usize {
    DEFAULT_CONCURRENCY_LIMIT
}

fn default_ttl_days() -> u32 {
    DEFAULT_TTL_DAYS
}

fn default_environment() -> String {
    DEFAULT_ENVIRONMENT.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, DemoforgeConfig::default());
        assert_eq!(config.concurrency_limit(), 4);
        assert_eq!(config.default_ttl_days, 7);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(load_config_from(&path).unwrap(), DemoforgeConfig::default());
    }

    #[test]
    fn custom_targets_override_presets_field_by_field() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "concurrency_limit": 0,
                "environments": {
                    "staging": { "endpoint_id": "stg-2", "properties": { "REGION": "eu" } },
                    "local": { "unify_api": "http://localhost:9000", "endpoint_id": "dev" }
                }
            }"#,
        )
        .unwrap();
        let config = load_config_from(&path).unwrap();
        assert_eq!(config.concurrency_limit(), 1);

        let staging = config.environment(Some("staging")).unwrap();
        assert_eq!(staging.unify_api, "https://api.staging.unify.io");
        assert_eq!(staging.endpoint_id, "stg-2");
        assert_eq!(staging.properties.get("REGION").map(String::as_str), Some("eu"));

        let local = config.environment(Some("local")).unwrap();
        assert_eq!(local.unify_api, "http://localhost:9000");
        assert_eq!(config.environment(None).unwrap().endpoint_id, "prod");
        assert_eq!(config.environment_names(), vec!["production", "staging", "local"]);
    }

    #[test]
    fn unknown_target_lists_available_names() {
        let error = DemoforgeConfig::default().environment(Some("qa")).unwrap_err();
        assert_eq!(error.to_string(), "unknown environment target 'qa' (available: production, staging)");
    }

    #[test]
    fn config_path_and_api_base_respect_env_overrides() {
        temp_env::with_vars(
            [
                (CONFIG_PATH_ENV, Some("/tmp/demoforge-test/config.json")),
                (GITHUB_API_BASE_ENV, Some("https://github.example.com/api/v3")),
            ],
            || {
                assert_eq!(default_config_path(), PathBuf::from("/tmp/demoforge-test/config.json"));
                assert_eq!(DemoforgeConfig::default().github_api_base(), "https://github.example.com/api/v3");
            },
        );
        temp_env::with_var(GITHUB_API_BASE_ENV, None::<&str>, || {
            assert_eq!(DemoforgeConfig::default().github_api_base(), DEFAULT_GITHUB_API_BASE);
        });
    }
}
