//! Kernel route management for the reserved test networks
//!
//! Injected traffic only reaches the daemon if the reserved networks
//! route to loopback. The harness owns both routes for the lifetime of a
//! run: installed once at setup, removed exactly once at shutdown.

use std::net::Ipv4Addr;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::common::{Error, Result};

/// RFC 5737 TEST-NET-1.
pub const TEST_NET: &str = "192.0.2.0/24";
/// RFC 2544 network-equipment benchmark range.
pub const BENCHMARK_NET: &str = "192.18.0.0/15";

/// Both networks the harness owns exclusively during a run.
pub const RESERVED_NETWORKS: [&str; 2] = [TEST_NET, BENCHMARK_NET];

pub struct RouteManager {
    gateway: Ipv4Addr,
}

impl Default for RouteManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteManager {
    pub fn new() -> Self {
        Self {
            gateway: Ipv4Addr::LOCALHOST,
        }
    }

    /// Route `network` to the loopback gateway.
    ///
    /// The route is deleted first so a leftover entry from an earlier run
    /// can neither fail the add nor leave a duplicate; installing twice in
    /// a row therefore yields exactly one entry.
    pub async fn install(&self, network: &'static str) -> Result<()> {
        if let Err(err) = self.remove(network).await {
            debug!("cannot remove route {network}: {err}");
        }
        let args = add_args(network, self.gateway);
        if !run_ip(&args).await? {
            return Err(Error::RouteCommand {
                action: "add",
                network,
                reason: format!("ip {} failed", args.join(" ")),
            });
        }
        Ok(())
    }

    pub async fn remove(&self, network: &'static str) -> Result<()> {
        let args = del_args(network);
        if !run_ip(&args).await? {
            return Err(Error::RouteCommand {
                action: "del",
                network,
                reason: format!("ip {} failed", args.join(" ")),
            });
        }
        Ok(())
    }

    /// Install routes for both reserved networks.
    pub async fn install_all(&self) -> Result<()> {
        for network in RESERVED_NETWORKS {
            self.install(network).await?;
        }
        Ok(())
    }

    /// Remove both reserved routes.
    ///
    /// Failures are logged, never escalated, and every removal is
    /// attempted regardless of earlier errors: leaking routing-table
    /// state across runs is worse than a noisy teardown.
    pub async fn remove_all(&self) {
        for network in RESERVED_NETWORKS {
            if let Err(err) = self.remove(network).await {
                debug!("cannot remove route {network}: {err}");
            }
        }
    }
}

fn add_args(network: &str, gateway: Ipv4Addr) -> Vec<String> {
    vec![
        "route".to_string(),
        "add".to_string(),
        network.to_string(),
        "via".to_string(),
        gateway.to_string(),
    ]
}

fn del_args(network: &str) -> Vec<String> {
    vec!["route".to_string(), "del".to_string(), network.to_string()]
}

async fn run_ip(args: &[String]) -> Result<bool> {
    let status = Command::new("ip")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    Ok(status.success())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_points_network_at_loopback() {
        assert_eq!(
            add_args(TEST_NET, Ipv4Addr::LOCALHOST),
            vec!["route", "add", "192.0.2.0/24", "via", "127.0.0.1"]
        );
    }

    #[test]
    fn del_names_only_the_network() {
        assert_eq!(
            del_args(BENCHMARK_NET),
            vec!["route", "del", "192.18.0.0/15"]
        );
    }

    #[test]
    fn both_reserved_networks_are_covered() {
        assert_eq!(RESERVED_NETWORKS.len(), 2);
        assert!(RESERVED_NETWORKS.contains(&TEST_NET));
        assert!(RESERVED_NETWORKS.contains(&BENCHMARK_NET));
    }
}
