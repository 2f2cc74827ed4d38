//! Well-known filesystem locations for the harness

use std::path::PathBuf;

const PROJECT_NAME: &str = "decoyd-regress";

/// Default pidfile written by the daemon under test.
pub const DEFAULT_PIDFILE: &str = "/var/run/decoyd.pid";

/// Get the path to the harness configuration file
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/decoyd-regress/config.toml`
/// - macOS: `~/Library/Application Support/decoyd-regress/config.toml`
pub fn config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", PROJECT_NAME)
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Get the path to the log directory holding the per-run diagnostic dump
pub fn log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", PROJECT_NAME)
        .map(|dirs| dirs.data_dir().join("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_is_valid() {
        let path = config_path();
        assert!(path.is_some());
    }

    #[test]
    fn test_log_dir_is_valid() {
        let dir = log_dir();
        assert!(dir.is_some());
    }
}
