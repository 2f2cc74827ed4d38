//! Regression run orchestration
//!
//! Drives a run through its states: validate the daemon and its
//! configuration, install the reserved routes, execute each scenario
//! (stop stale daemon, start capture, start daemon, inject, settle, stop
//! daemon, stop capture, compare), then tear the routes down and report.
//!
//! Capture always brackets the daemon's lifetime, so no daemon-emitted
//! packet can be missed, and exactly one daemon instance is alive while
//! packets are injected.

use std::io::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use colored::Colorize;
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureTask, CAPTURE_FILTER};
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::inject::{self, RawSender};
use crate::route::RouteManager;
use crate::scenario::Scenario;
use crate::supervisor::{self, Supervisor};
use crate::trace::{self, Verdict};

/// Options taken from the command line for one run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Verbose diagnostics; trace files are kept even on success
    pub debug: bool,
    /// Promote captures to fixtures instead of comparing
    pub generate: bool,
    /// Name shown in the run banner
    pub suite_name: String,
}

/// Aggregate result of a run.
#[derive(Debug, Default)]
pub struct Summary {
    pub attempted: u32,
    pub passed: u32,
    pub failures: Vec<Failure>,
    /// Set when the run was aborted before all scenarios could execute
    pub fatal: Option<String>,
}

#[derive(Debug)]
pub struct Failure {
    pub scenario: String,
    pub detail: String,
}

impl Summary {
    /// Exit status contract: zero only when every attempted scenario
    /// passed and the run was not aborted.
    pub fn exit_code(&self) -> i32 {
        if self.fatal.is_none() && self.attempted == self.passed {
            0
        } else {
            1
        }
    }
}

pub struct Harness {
    config: Config,
    options: RunOptions,
    daemon_config: PathBuf,
    supervisor: Supervisor,
    routes: RouteManager,
    interface: Option<String>,
    sender: RawSender,
    summary: Summary,
}

impl Harness {
    /// Validate the daemon binary and configuration and prepare the run.
    /// Any failure here aborts before a single scenario is attempted.
    pub async fn new(config: Config, daemon_config: PathBuf, options: RunOptions) -> Result<Harness> {
        let binary = config
            .resolve_binary()
            .ok_or_else(|| Error::DaemonBinaryMissing(config.daemon.binary.clone()))?;
        if !daemon_config.exists() {
            return Err(Error::DaemonConfigMissing(daemon_config));
        }

        let interface = supervisor::find_loopback();
        let supervisor = Supervisor::new(
            binary,
            &config.daemon,
            interface.clone(),
            Duration::from_secs(config.timing.start_settle_secs),
        );
        supervisor.verify_config(&daemon_config).await?;

        let sender = RawSender::open()?;

        eprintln!("Testing \"{}\" behavior:", options.suite_name);

        Ok(Harness {
            config,
            options,
            daemon_config,
            supervisor,
            routes: RouteManager::new(),
            interface,
            sender,
            summary: Summary::default(),
        })
    }

    /// Run every scenario sequentially, then tear down unconditionally.
    pub async fn execute(mut self, scenarios: &[Scenario]) -> Summary {
        if let Err(err) = self.routes.install_all().await {
            // Degraded, not fatal: scenarios run but will likely miss
            // their return traffic
            error!("there was an error adding the route: {err}");
        }

        for scenario in scenarios {
            match self.run_scenario(scenario).await {
                Ok(()) => {}
                Err(err) if err.is_fatal() => {
                    eprintln!("{}", "FAILED".red());
                    error!("{err}");
                    self.summary.fatal = Some(err.to_string());
                    break;
                }
                Err(err) => {
                    eprintln!("{}", "FAILED".red());
                    warn!(scenario = %scenario.name, "{err}");
                    self.summary.failures.push(Failure {
                        scenario: scenario.name.clone(),
                        detail: err.to_string(),
                    });
                }
            }
        }

        // Teardown is unconditional and exhaustive: a stale daemon or a
        // leftover route must not outlive the run, whatever happened above
        if let Err(err) = self.supervisor.stop().await {
            warn!("teardown: {err}");
        }
        self.routes.remove_all().await;

        self.summary
    }

    async fn run_scenario(&mut self, scenario: &Scenario) -> Result<()> {
        self.summary.attempted += 1;
        eprint!("\tRunning {}: ", scenario.name);
        let _ = std::io::stderr().flush();

        self.supervisor.stop().await?;

        let interface = self.interface.clone().ok_or_else(|| Error::CaptureOpen {
            interface: "<none>".to_string(),
            reason: "no loopback interface found".to_string(),
        })?;
        let grace = Duration::from_secs(self.config.timing.capture_grace_secs);
        let capture = CaptureTask::start(&interface, CAPTURE_FILTER, grace)?;

        let daemon_config = scenario.config.as_deref().unwrap_or(&self.daemon_config);
        self.supervisor.start(daemon_config).await?;

        let injected = inject::send_scenario(
            &self.sender,
            scenario,
            Duration::from_millis(self.config.timing.inject_gap_ms),
        )
        .await;

        tokio::time::sleep(Duration::from_secs(self.config.timing.post_inject_secs)).await;
        self.supervisor.stop().await?;
        let trace_path = capture.stop().await;

        // Surfaced only now so the daemon and capture are torn down first
        injected?;

        if self.options.generate {
            trace::promote(&trace_path, &scenario.fixture)?;
            eprintln!("generated '{}'", scenario.fixture.display());
            self.summary.passed += 1;
            return Ok(());
        }

        match trace::compare(&trace_path, &scenario.fixture)? {
            Verdict::Pass => {
                eprintln!("{}", "OK".green());
                self.summary.passed += 1;
                if self.options.debug {
                    debug!(trace = %trace_path.display(), "keeping trace file");
                } else if let Err(err) = std::fs::remove_file(&trace_path) {
                    warn!(
                        "expected temporary file {} does not exist: {err}",
                        trace_path.display()
                    );
                }
            }
            Verdict::Mismatch(divergence) => {
                eprintln!("{}", "FAILED".red());
                if self.options.debug {
                    eprintln!("Differ on line {}", divergence.line);
                    eprintln!("-{}", divergence.expected);
                    eprintln!("+{}", divergence.actual);
                }
                info!(
                    scenario = %scenario.name,
                    trace = %trace_path.display(),
                    fixture = %scenario.fixture.display(),
                    line = divergence.line,
                    expected = %divergence.expected,
                    actual = %divergence.actual,
                    "trace mismatch"
                );
                self.summary.failures.push(Failure {
                    scenario: scenario.name.clone(),
                    detail: format!(
                        "line {}: expected '{}', got '{}' (trace kept at {})",
                        divergence.line,
                        divergence.expected,
                        divergence.actual,
                        trace_path.display()
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Print the aggregate result.
pub fn report(summary: &Summary) {
    if let Some(fatal) = &summary.fatal {
        eprintln!("{}: {fatal}", "aborted".red().bold());
    }
    for failure in &summary.failures {
        eprintln!("  {}: {}", failure.scenario.red(), failure.detail);
    }
    if summary.exit_code() == 0 {
        eprintln!("  OK ({})", summary.passed);
    } else {
        eprintln!("  FAILED ({}/{})", summary.passed, summary.attempted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_zero_only_when_all_attempted_passed() {
        let all_passed = Summary {
            attempted: 3,
            passed: 3,
            ..Default::default()
        };
        assert_eq!(all_passed.exit_code(), 0);

        let one_failed = Summary {
            attempted: 3,
            passed: 2,
            ..Default::default()
        };
        assert_eq!(one_failed.exit_code(), 1);
    }

    #[test]
    fn empty_run_exits_zero() {
        assert_eq!(Summary::default().exit_code(), 0);
    }

    #[test]
    fn fatal_abort_exits_nonzero_even_with_clean_counters() {
        let aborted = Summary {
            attempted: 2,
            passed: 2,
            fatal: Some("expected results file not found".to_string()),
            ..Default::default()
        };
        assert_eq!(aborted.exit_code(), 1);
    }
}
