use std::path::PathBuf;

use dirs_next::{config_dir, home_dir};

/// Application directory under the platform configuration directory.
pub const APP_DIR_NAME: &str = "demoforge";

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    let trimmed = path.trim();
    if trimmed == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = trimmed.strip_prefix("~/") {
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    if let Some(rest) = trimmed.strip_prefix("~\\") {
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    PathBuf::from(trimmed)
}

/// `<config_dir>/demoforge`, or `./demoforge` when no config directory is known.
pub fn demoforge_config_dir() -> PathBuf {
    config_dir().unwrap_or_else(|| PathBuf::from(".")).join(APP_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_plain_paths_alone() {
        assert_eq!(expand_tilde(" /tmp/sessions.json "), PathBuf::from("/tmp/sessions.json"));
    }

    #[test]
    fn expands_home_prefix() {
        if let Some(home) = home_dir() {
            assert_eq!(expand_tilde("~/scenarios"), home.join("scenarios"));
        }
    }
}
