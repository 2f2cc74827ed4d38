//! Error types for the regression harness
//!
//! Errors fall into two classes: fatal errors abort the whole run before
//! or between scenarios, everything else is charged against the current
//! scenario and the run continues.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the regression harness
#[derive(Error, Debug)]
pub enum Error {
    // === Setup Errors ===
    #[error("Cannot find daemon program '{0}'")]
    DaemonBinaryMissing(PathBuf),

    #[error("Configuration file '{0}' does not exist")]
    DaemonConfigMissing(PathBuf),

    #[error("Cannot use configuration file '{path}', daemon verify run exited with status {status}")]
    ConfigRejected { path: PathBuf, status: i32 },

    // === Supervisor Errors ===
    #[error("Failed to spawn daemon: {0}")]
    DaemonSpawn(#[source] io::Error),

    #[error("Cannot remove pidfile '{path}': {source}")]
    PidfileRemove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    // === Route Errors ===
    #[error("Route {action} for {network} failed: {reason}")]
    RouteCommand {
        action: &'static str,
        network: &'static str,
        reason: String,
    },

    // === Capture Errors ===
    #[error("Cannot run packet capture on '{interface}': {reason}")]
    CaptureOpen { interface: String, reason: String },

    #[error("We lost the file with the capture output '{0}'")]
    TraceLost(PathBuf),

    // === Injection Errors ===
    #[error("Raw socket unavailable: {0}")]
    RawSocket(#[source] io::Error),

    #[error("Raw send of packet {index} failed: {source}")]
    SendFailed {
        index: usize,
        #[source]
        source: io::Error,
    },

    // === Comparison Errors ===
    #[error("Expected results file '{0}' not found")]
    FixtureMissing(PathBuf),

    #[error("Cannot move generated trace '{src}' over fixture '{dst}': {reason}")]
    Promote {
        src: PathBuf,
        dst: PathBuf,
        reason: String,
    },

    // === Scenario Errors ===
    #[error("Failed to read scenario '{path}': {reason}")]
    ScenarioRead { path: PathBuf, reason: String },

    #[error("Failed to parse scenario '{path}': {reason}")]
    ScenarioParse { path: PathBuf, reason: String },

    #[error("Invalid packet definition: {0}")]
    PacketSpec(String),

    // === Configuration Errors ===
    #[error("Invalid harness configuration: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether this error aborts the entire run rather than failing the
    /// current scenario.
    ///
    /// Missing binaries, rejected configurations and a pidfile that cannot
    /// be removed all poison every later scenario. A missing fixture or a
    /// lost trace file means the harness itself is broken, not the daemon,
    /// so those are not counted as scenario failures either.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::DaemonBinaryMissing(_)
                | Error::DaemonConfigMissing(_)
                | Error::ConfigRejected { .. }
                | Error::PidfileRemove { .. }
                | Error::FixtureMissing(_)
                | Error::TraceLost(_)
                | Error::Promote { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_errors_are_fatal() {
        assert!(Error::DaemonBinaryMissing(PathBuf::from("decoyd")).is_fatal());
        assert!(Error::DaemonConfigMissing(PathBuf::from("decoyd.conf")).is_fatal());
        assert!(Error::ConfigRejected {
            path: PathBuf::from("decoyd.conf"),
            status: 1
        }
        .is_fatal());
    }

    #[test]
    fn missing_fixture_is_fatal_not_a_scenario_failure() {
        assert!(Error::FixtureMissing(PathBuf::from("fixtures/a.trace")).is_fatal());
        assert!(Error::TraceLost(PathBuf::from("/tmp/trace")).is_fatal());
    }

    #[test]
    fn scenario_level_errors_are_not_fatal() {
        assert!(!Error::SendFailed {
            index: 0,
            source: io::Error::new(io::ErrorKind::PermissionDenied, "raw send")
        }
        .is_fatal());
        assert!(!Error::CaptureOpen {
            interface: "lo".into(),
            reason: "permission denied".into()
        }
        .is_fatal());
        assert!(!Error::RouteCommand {
            action: "add",
            network: "192.0.2.0/24",
            reason: "exit status 2".into()
        }
        .is_fatal());
    }
}
