//! Raw-socket packet injection
//!
//! The harness plays the "client" side of every scenario: each packet is
//! serialized and checksummed at send time, written to a raw IPv4 socket,
//! and paced with a fixed gap so ordering on the wire matches the
//! scenario definition.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::debug;

use crate::common::{Error, Result};
use crate::scenario::Scenario;

pub struct RawSender {
    socket: Socket,
}

impl RawSender {
    /// Open a raw IPv4 socket with header inclusion.
    /// Requires CAP_NET_RAW (or root).
    pub fn open() -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::from(libc::IPPROTO_RAW)))
            .map_err(Error::RawSocket)?;
        socket.set_header_included(true).map_err(Error::RawSocket)?;
        Ok(Self { socket })
    }

    pub fn send(&self, packet: &[u8], dst: Ipv4Addr) -> std::io::Result<usize> {
        let addr = SockAddr::from(SocketAddrV4::new(dst, 0));
        self.socket.send_to(packet, &addr)
    }
}

/// Send every packet of a scenario in order, sleeping `gap` between
/// sends. A failed send aborts the scenario; there are no retries.
pub async fn send_scenario(sender: &RawSender, scenario: &Scenario, gap: Duration) -> Result<()> {
    for (index, spec) in scenario.packets.iter().enumerate() {
        let bytes = spec.to_bytes()?;
        sender
            .send(&bytes, spec.dst)
            .map_err(|source| Error::SendFailed { index, source })?;
        debug!(
            scenario = %scenario.name,
            index,
            len = bytes.len(),
            dst = %spec.dst,
            "injected packet"
        );
        tokio::time::sleep(gap).await;
    }
    Ok(())
}
