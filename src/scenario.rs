//! Scenario definitions
//!
//! A scenario is a named, ordered packet sequence plus the golden trace it
//! is verified against, loaded from a YAML file. Scenarios are immutable
//! after loading and own their packet sequence.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::common::{Error, Result};
use crate::packet::PacketSpec;

/// A complete scenario loaded from a YAML file
#[derive(Debug, Deserialize)]
pub struct Scenario {
    /// Name of the scenario
    pub name: String,

    /// Optional description of what the scenario verifies
    pub description: Option<String>,

    /// Golden trace this scenario is verified against
    pub fixture: PathBuf,

    /// Daemon configuration override; the suite config applies when absent
    pub config: Option<PathBuf>,

    /// The ordered packet sequence to inject
    pub packets: Vec<PacketSpec>,
}

impl Scenario {
    /// Load a scenario, resolving relative paths against the scenario
    /// file's directory.
    pub fn load(path: &Path) -> Result<Scenario> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::ScenarioRead {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut scenario: Scenario =
            serde_yaml::from_str(&content).map_err(|e| Error::ScenarioParse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let dir = path.parent().unwrap_or(Path::new("."));
        if scenario.fixture.is_relative() {
            scenario.fixture = dir.join(&scenario.fixture);
        }
        if let Some(config) = scenario.config.take() {
            scenario.config = Some(if config.is_relative() {
                dir.join(config)
            } else {
                config
            });
        }

        Ok(scenario)
    }

    /// Expand files and directories into a loaded scenario list.
    /// Directory entries run in name order.
    pub fn collect(paths: &[PathBuf]) -> Result<Vec<Scenario>> {
        let mut files = Vec::new();
        for path in paths {
            if path.is_dir() {
                let mut entries: Vec<PathBuf> = std::fs::read_dir(path)?
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.path())
                    .filter(|p| {
                        p.extension()
                            .map(|ext| ext == "yaml" || ext == "yml")
                            .unwrap_or(false)
                    })
                    .collect();
                entries.sort();
                files.extend(entries);
            } else {
                files.push(path.clone());
            }
        }
        files.iter().map(|path| Scenario::load(path)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Transport;
    use std::io::Write;

    const SCENARIO_YAML: &str = r#"
name: tcp-syn-to-port23
description: SYN to the emulated telnet port must provoke a SYN-ACK
fixture: fixtures/tcp-syn-to-port23.trace
packets:
  - src: 192.0.2.100
    dst: 192.18.0.10
    id: 4660
    proto: tcp
    src_port: 4242
    dst_port: 23
    seq: 1
    flags: S
"#;

    #[test]
    fn scenario_parses_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SCENARIO_YAML.as_bytes()).unwrap();

        let scenario = Scenario::load(file.path()).unwrap();
        assert_eq!(scenario.name, "tcp-syn-to-port23");
        assert_eq!(scenario.packets.len(), 1);

        let packet = &scenario.packets[0];
        assert_eq!(packet.ttl, 64, "TTL default");
        match &packet.transport {
            Transport::Tcp {
                dst_port,
                flags,
                window,
                ..
            } => {
                assert_eq!(*dst_port, 23);
                assert_eq!(flags, "S");
                assert_eq!(*window, 8192, "window default");
            }
            other => panic!("expected tcp transport, got {other:?}"),
        }
    }

    #[test]
    fn relative_fixture_resolves_against_scenario_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("syn.yaml");
        std::fs::write(&path, SCENARIO_YAML).unwrap();

        let scenario = Scenario::load(&path).unwrap();
        assert_eq!(
            scenario.fixture,
            dir.path().join("fixtures/tcp-syn-to-port23.trace")
        );
    }

    #[test]
    fn collect_expands_directories_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.yaml", "a.yaml", "notes.txt"] {
            std::fs::write(dir.path().join(name), SCENARIO_YAML).unwrap();
        }

        let scenarios = Scenario::collect(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(scenarios.len(), 2);
        assert!(scenarios[0].fixture.starts_with(dir.path()));
    }

    #[test]
    fn malformed_scenario_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"name: broken\npackets: 12\n").unwrap();
        assert!(matches!(
            Scenario::load(file.path()),
            Err(Error::ScenarioParse { .. })
        ));
    }
}
