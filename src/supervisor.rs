//! Lifecycle management for the daemon under test
//!
//! The supervisor guarantees mutual exclusion: starting always stops any
//! existing instance first, found through the pidfile or, failing that,
//! by scanning running processes for the daemon's name.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};
use tracing::{debug, warn};

use crate::common::config::DaemonConfig;
use crate::common::{Error, Result};

/// How long a stderr drain may block during teardown.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// How long the daemon gets to exit after SIGINT before being killed.
const EXIT_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Supervisor {
    binary: PathBuf,
    process_name: String,
    pidfile: PathBuf,
    placeholder_network: String,
    interface: Option<String>,
    start_settle: Duration,
    handle: Option<DaemonHandle>,
}

/// A live daemon instance we spawned.
struct DaemonHandle {
    child: Child,
    stderr: Option<ChildStderr>,
}

impl Supervisor {
    pub fn new(
        binary: PathBuf,
        daemon: &DaemonConfig,
        interface: Option<String>,
        start_settle: Duration,
    ) -> Self {
        Self {
            binary,
            process_name: daemon.process_name.clone(),
            pidfile: daemon.pidfile.clone(),
            placeholder_network: daemon.placeholder_network.clone(),
            interface,
            start_settle,
            handle: None,
        }
    }

    /// Fixed invocation of the daemon under test: embedded webserver and
    /// auto-update off, fixed RNG seed, foreground with debug logging,
    /// bound to the test interface, claiming the placeholder network.
    fn command_args(&self, config: &Path, verify_only: bool) -> Vec<String> {
        let mut args = vec![
            "--disable-webserver".to_string(),
            "--disable-update".to_string(),
        ];
        if verify_only {
            args.push("--verify-config".to_string());
        } else {
            args.extend(["-R".to_string(), "1".to_string(), "-d".to_string()]);
        }
        if let Some(interface) = &self.interface {
            args.extend(["-i".to_string(), interface.clone()]);
        }
        args.extend(["-f".to_string(), config.display().to_string()]);
        args.push(self.placeholder_network.clone());
        args
    }

    /// Run the daemon once in verify-only mode against `config`.
    /// A non-zero exit means the configuration is unusable.
    pub async fn verify_config(&self, config: &Path) -> Result<()> {
        let args = self.command_args(config, true);
        debug!(binary = %self.binary.display(), ?args, "verifying daemon configuration");
        let status = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(Error::DaemonSpawn)?;
        if !status.success() {
            return Err(Error::ConfigRejected {
                path: config.to_path_buf(),
                status: status.code().unwrap_or(-1),
            });
        }
        Ok(())
    }

    /// Spawn the daemon with `config`, then wait the settle interval so it
    /// can finish binding its sockets. Any live instance is stopped first.
    pub async fn start(&mut self, config: &Path) -> Result<()> {
        self.stop().await?;

        let args = self.command_args(config, false);
        debug!(binary = %self.binary.display(), ?args, "starting daemon");
        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(Error::DaemonSpawn)?;

        let stderr = child.stderr.take();
        self.handle = Some(DaemonHandle { child, stderr });

        tokio::time::sleep(self.start_settle).await;
        Ok(())
    }

    /// Stop the running daemon.
    ///
    /// The pidfile is authoritative. A pidfile we cannot remove is fatal:
    /// a stale one would break mutual exclusion for the next start. With
    /// no pidfile present, the process table is scanned for the daemon's
    /// name; finding nothing makes this a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        match read_pidfile(&self.pidfile) {
            Some(pid) => {
                if process_exists(pid) {
                    debug!(pid, "stopping daemon");
                    let signalled = signal(pid, libc::SIGINT);
                    match self.drain_stderr().await {
                        Some(output) => {
                            if !signalled {
                                warn!("failed to stop daemon: {output}");
                            }
                        }
                        // No captured stream: that pid was not ours
                        None => debug!("stopped a daemon instance we did not start"),
                    }
                    self.reap().await;
                }
                if let Err(source) = std::fs::remove_file(&self.pidfile) {
                    return Err(Error::PidfileRemove {
                        path: self.pidfile.clone(),
                        source,
                    });
                }
            }
            None => {
                debug!("no daemon pidfile");
                if let Some(pid) = find_process(&self.process_name) {
                    debug!(pid, name = %self.process_name, "stopping daemon found by name scan");
                    signal(pid, libc::SIGINT);
                }
            }
        }
        self.handle = None;
        Ok(())
    }

    /// Best-effort read of whatever the daemon wrote to stderr.
    /// Returns None when there is no captured stream to drain.
    async fn drain_stderr(&mut self) -> Option<String> {
        let handle = self.handle.as_mut()?;
        let mut stderr = handle.stderr.take()?;
        let mut output = String::new();
        let result =
            tokio::time::timeout(DRAIN_TIMEOUT, stderr.read_to_string(&mut output)).await;
        match result {
            Ok(Ok(_)) => Some(output),
            Ok(Err(err)) => {
                debug!("stderr drain failed: {err}");
                None
            }
            Err(_) => {
                debug!("stderr drain timed out");
                Some(output)
            }
        }
    }

    /// Reap our child process so a signalled daemon does not linger as a
    /// zombie for the rest of the run.
    async fn reap(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            match tokio::time::timeout(EXIT_TIMEOUT, handle.child.wait()).await {
                Ok(Ok(status)) => debug!(%status, "daemon exited"),
                Ok(Err(err)) => debug!("daemon wait failed: {err}"),
                Err(_) => {
                    warn!("daemon did not exit after SIGINT, killing");
                    let _ = handle.child.kill().await;
                }
            }
        }
    }
}

fn read_pidfile(path: &Path) -> Option<i32> {
    let contents = std::fs::read_to_string(path).ok()?;
    contents.trim().parse().ok()
}

/// Signal-0 probe: tests process existence without side effects.
fn process_exists(pid: i32) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}

fn signal(pid: i32, signal: i32) -> bool {
    unsafe { libc::kill(pid, signal) == 0 }
}

/// First running process whose name matches the daemon's.
fn find_process(name: &str) -> Option<i32> {
    let sys = sysinfo::System::new_all();
    sys.processes()
        .iter()
        .find(|(_, process)| process.name() == name)
        .map(|(pid, _)| pid.as_u32() as i32)
}

/// Enumerate network interfaces and return the first loopback.
///
/// Absence is not fatal here; capture setup fails loudly later if no
/// usable interface exists.
pub fn find_loopback() -> Option<String> {
    let interface = pnet::datalink::interfaces()
        .into_iter()
        .find(|interface| interface.is_loopback());
    match &interface {
        Some(interface) => debug!(name = %interface.name, "loopback interface"),
        None => debug!("failed to find loopback interface"),
    }
    interface.map(|interface| interface.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::DaemonConfig;

    fn supervisor() -> Supervisor {
        Supervisor::new(
            PathBuf::from("/usr/sbin/decoyd"),
            &DaemonConfig::default(),
            Some("lo".to_string()),
            Duration::from_secs(2),
        )
    }

    #[test]
    fn run_command_line_matches_template() {
        let args = supervisor().command_args(Path::new("/tmp/decoyd.conf"), false);
        assert_eq!(
            args,
            vec![
                "--disable-webserver",
                "--disable-update",
                "-R",
                "1",
                "-d",
                "-i",
                "lo",
                "-f",
                "/tmp/decoyd.conf",
                "192.18.0.0/15",
            ]
        );
    }

    #[test]
    fn verify_command_line_drops_foreground_flags() {
        let args = supervisor().command_args(Path::new("/tmp/decoyd.conf"), true);
        assert!(args.contains(&"--verify-config".to_string()));
        assert!(!args.contains(&"-d".to_string()));
        assert!(!args.contains(&"-R".to_string()));
    }

    #[test]
    fn missing_interface_is_omitted_from_the_command_line() {
        let supervisor = Supervisor::new(
            PathBuf::from("decoyd"),
            &DaemonConfig::default(),
            None,
            Duration::from_secs(2),
        );
        let args = supervisor.command_args(Path::new("decoyd.conf"), false);
        assert!(!args.contains(&"-i".to_string()));
    }

    #[test]
    fn pidfile_parsing_tolerates_whitespace() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        file.write_all(b" 12345\n").unwrap();
        assert_eq!(read_pidfile(file.path()), Some(12345));

        let empty = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(read_pidfile(empty.path()), None);

        assert_eq!(read_pidfile(Path::new("/nonexistent/pidfile")), None);
    }

    #[test]
    fn our_own_process_exists() {
        let pid = std::process::id() as i32;
        assert!(process_exists(pid));
    }
}
