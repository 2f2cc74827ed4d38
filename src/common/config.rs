//! Harness configuration file handling

use serde::Deserialize;
use std::path::PathBuf;

use super::paths::{self, config_path};
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Daemon under test
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Timing settings
    #[serde(default)]
    pub timing: Timing,
}

/// Settings describing the daemon under test
#[derive(Debug, Deserialize, Clone)]
pub struct DaemonConfig {
    /// Path to the daemon binary, or a bare name resolved through PATH
    #[serde(default = "default_binary")]
    pub binary: PathBuf,

    /// Process name used when stopping a daemon without a pidfile
    #[serde(default = "default_process_name")]
    pub process_name: String,

    /// Pidfile the daemon writes on startup
    #[serde(default = "default_pidfile")]
    pub pidfile: PathBuf,

    /// Placeholder network the daemon claims on its command line
    #[serde(default = "default_placeholder_network")]
    pub placeholder_network: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            process_name: default_process_name(),
            pidfile: default_pidfile(),
            placeholder_network: default_placeholder_network(),
        }
    }
}

fn default_binary() -> PathBuf {
    PathBuf::from("decoyd")
}
fn default_process_name() -> String {
    "decoyd".to_string()
}
fn default_pidfile() -> PathBuf {
    PathBuf::from(paths::DEFAULT_PIDFILE)
}
fn default_placeholder_network() -> String {
    "192.18.0.0/15".to_string()
}

/// Timing settings
///
/// These are blocking sleeps, not readiness probes: neither the daemon nor
/// the capture device emits a reliable "ready" signal, so the harness
/// trades wall-clock time for robustness.
#[derive(Debug, Deserialize, Clone)]
pub struct Timing {
    /// Settle interval after spawning the daemon, seconds
    #[serde(default = "default_start_settle")]
    pub start_settle_secs: u64,

    /// Pacing gap between injected packets, milliseconds
    #[serde(default = "default_inject_gap")]
    pub inject_gap_ms: u64,

    /// Settle interval after the last injected packet, seconds
    #[serde(default = "default_post_inject")]
    pub post_inject_secs: u64,

    /// Grace delay on either side of capture shutdown, seconds
    #[serde(default = "default_capture_grace")]
    pub capture_grace_secs: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            start_settle_secs: default_start_settle(),
            inject_gap_ms: default_inject_gap(),
            post_inject_secs: default_post_inject(),
            capture_grace_secs: default_capture_grace(),
        }
    }
}

fn default_start_settle() -> u64 {
    2
}
fn default_inject_gap() -> u64 {
    100
}
fn default_post_inject() -> u64 {
    1
}
fn default_capture_grace() -> u64 {
    1
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                let content = std::fs::read_to_string(&path)?;
                return toml::from_str(&content).map_err(|e| Error::ConfigParse(e.to_string()));
            }
        }
        Ok(Self::default())
    }

    /// Resolve the daemon binary to an existing path
    ///
    /// Bare names fall back to searching PATH
    pub fn resolve_binary(&self) -> Option<PathBuf> {
        if self.daemon.binary.components().count() > 1 {
            return self.daemon.binary.exists().then(|| self.daemon.binary.clone());
        }
        if self.daemon.binary.exists() {
            return Some(self.daemon.binary.clone());
        }
        which::which(&self.daemon.binary).ok()
    }
}
