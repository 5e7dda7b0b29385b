//! Shared utilities: configuration loading, session persistence, path handling, and
//! redaction of secret-looking text before it reaches logs or progress events.

pub mod config;
pub mod path_processing;
pub mod session_store;
pub mod text_processing;

pub use config::{ConfigError, DemoforgeConfig, EnvironmentTarget, load_config};
pub use path_processing::{demoforge_config_dir, expand_tilde};
pub use session_store::{InMemorySessionStore, JsonSessionStore, SessionStore, SessionStoreError};
pub use text_processing::redact_sensitive;
