//! Raw IPv4 packet construction
//!
//! Scenarios describe packets declaratively; serialization and checksum
//! computation happen at send time, never ahead of it, since addressing
//! and payload are per-scenario inputs.

use std::net::Ipv4Addr;

use serde::Deserialize;

use crate::common::{Error, Result};

/// Size of an IPv4 header without options.
pub const IPV4_HEADER_LEN: usize = 20;

const PROTO_ICMP: u8 = 1;
const PROTO_TCP: u8 = 6;
const PROTO_UDP: u8 = 17;

/// One outbound datagram of a scenario, as written in the YAML file.
#[derive(Debug, Clone, Deserialize)]
pub struct PacketSpec {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,

    #[serde(default = "default_ttl")]
    pub ttl: u8,

    /// IP identification field; fixed so generated traces stay stable
    #[serde(default)]
    pub id: u16,

    #[serde(flatten)]
    pub transport: Transport,
}

fn default_ttl() -> u8 {
    64
}

/// Transport-layer portion of a packet definition
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "proto", rename_all = "snake_case")]
pub enum Transport {
    Tcp {
        src_port: u16,
        dst_port: u16,
        #[serde(default)]
        seq: u32,
        #[serde(default)]
        ack: u32,
        /// Flag letters, e.g. "S", "SA", "FPU"
        #[serde(default = "default_flags")]
        flags: String,
        #[serde(default = "default_window")]
        window: u16,
        #[serde(default)]
        payload: Option<Payload>,
    },
    Udp {
        src_port: u16,
        dst_port: u16,
        #[serde(default)]
        payload: Option<Payload>,
    },
    Icmp {
        icmp_type: u8,
        #[serde(default)]
        code: u8,
        #[serde(default)]
        payload: Option<Payload>,
    },
    Raw {
        protocol: u8,
        #[serde(default)]
        payload: Option<Payload>,
    },
}

fn default_flags() -> String {
    "S".to_string()
}
fn default_window() -> u16 {
    8192
}

/// Payload bytes given either as text or as a hex string
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    Hex(String),
}

impl Payload {
    pub fn bytes(&self) -> Result<Vec<u8>> {
        match self {
            Payload::Text(text) => Ok(text.as_bytes().to_vec()),
            Payload::Hex(hex) => decode_hex(hex),
        }
    }
}

fn payload_bytes(payload: &Option<Payload>) -> Result<Vec<u8>> {
    payload.as_ref().map(Payload::bytes).transpose().map(Option::unwrap_or_default)
}

fn decode_hex(input: &str) -> Result<Vec<u8>> {
    let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.len() % 2 != 0 {
        return Err(Error::PacketSpec(format!(
            "hex payload has odd length: '{input}'"
        )));
    }
    (0..cleaned.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&cleaned[i..i + 2], 16)
                .map_err(|_| Error::PacketSpec(format!("invalid hex payload: '{input}'")))
        })
        .collect()
}

/// Parse a flag-letter string into the TCP flags byte.
pub fn parse_tcp_flags(letters: &str) -> Result<u8> {
    let mut flags = 0u8;
    for letter in letters.chars() {
        flags |= match letter.to_ascii_uppercase() {
            'F' => 0x01,
            'S' => 0x02,
            'R' => 0x04,
            'P' => 0x08,
            'A' => 0x10,
            'U' => 0x20,
            'E' => 0x40,
            'C' => 0x80,
            other => {
                return Err(Error::PacketSpec(format!("unknown TCP flag '{other}'")));
            }
        };
    }
    Ok(flags)
}

impl PacketSpec {
    /// Serialize the datagram, computing the transport checksum (with the
    /// IPv4 pseudo-header) and then the IP header checksum.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let (protocol, transport) = self.transport.serialize(self.src, self.dst)?;

        let total_len = IPV4_HEADER_LEN + transport.len();
        if total_len > u16::MAX as usize {
            return Err(Error::PacketSpec(format!(
                "packet of {total_len} bytes exceeds the IPv4 length field"
            )));
        }

        let mut packet = vec![0u8; total_len];
        packet[0] = 0x45; // Version=4, IHL=5
        packet[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
        packet[4..6].copy_from_slice(&self.id.to_be_bytes());
        packet[8] = self.ttl;
        packet[9] = protocol;
        packet[12..16].copy_from_slice(&self.src.octets());
        packet[16..20].copy_from_slice(&self.dst.octets());
        packet[IPV4_HEADER_LEN..].copy_from_slice(&transport);

        let checksum = ip_checksum(&packet[..IPV4_HEADER_LEN]);
        packet[10..12].copy_from_slice(&checksum.to_be_bytes());

        Ok(packet)
    }
}

impl Transport {
    /// Serialize the transport segment with its checksum filled in.
    /// Returns the IP protocol number alongside the bytes.
    fn serialize(&self, src: Ipv4Addr, dst: Ipv4Addr) -> Result<(u8, Vec<u8>)> {
        match self {
            Transport::Tcp {
                src_port,
                dst_port,
                seq,
                ack,
                flags,
                window,
                payload,
            } => {
                let data = payload_bytes(payload)?;
                let mut segment = vec![0u8; 20 + data.len()];
                segment[0..2].copy_from_slice(&src_port.to_be_bytes());
                segment[2..4].copy_from_slice(&dst_port.to_be_bytes());
                segment[4..8].copy_from_slice(&seq.to_be_bytes());
                segment[8..12].copy_from_slice(&ack.to_be_bytes());
                segment[12] = 5 << 4; // data offset, no options
                segment[13] = parse_tcp_flags(flags)?;
                segment[14..16].copy_from_slice(&window.to_be_bytes());
                segment[20..].copy_from_slice(&data);

                let checksum = transport_checksum(&segment, src, dst, PROTO_TCP);
                segment[16..18].copy_from_slice(&checksum.to_be_bytes());
                Ok((PROTO_TCP, segment))
            }
            Transport::Udp {
                src_port,
                dst_port,
                payload,
            } => {
                let data = payload_bytes(payload)?;
                let mut segment = vec![0u8; 8 + data.len()];
                segment[0..2].copy_from_slice(&src_port.to_be_bytes());
                segment[2..4].copy_from_slice(&dst_port.to_be_bytes());
                let segment_len = segment.len() as u16;
                segment[4..6].copy_from_slice(&segment_len.to_be_bytes());
                segment[8..].copy_from_slice(&data);

                // A computed zero must be sent as 0xFFFF; zero on the wire
                // means "no checksum"
                let checksum = match transport_checksum(&segment, src, dst, PROTO_UDP) {
                    0 => 0xFFFF,
                    sum => sum,
                };
                segment[6..8].copy_from_slice(&checksum.to_be_bytes());
                Ok((PROTO_UDP, segment))
            }
            Transport::Icmp {
                icmp_type,
                code,
                payload,
            } => {
                let data = payload_bytes(payload)?;
                let mut segment = vec![0u8; 8 + data.len()];
                segment[0] = *icmp_type;
                segment[1] = *code;
                segment[8..].copy_from_slice(&data);

                // ICMP has no pseudo-header
                let checksum = ones_complement_sum(&segment);
                segment[2..4].copy_from_slice(&checksum.to_be_bytes());
                Ok((PROTO_ICMP, segment))
            }
            Transport::Raw { protocol, payload } => Ok((*protocol, payload_bytes(payload)?)),
        }
    }
}

/// One's complement sum of 16-bit words, as used by IP, TCP, UDP and ICMP.
fn ones_complement_sum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut i = 0;
    while i + 1 < data.len() {
        sum += u16::from_be_bytes([data[i], data[i + 1]]) as u32;
        i += 2;
    }
    // Odd trailing byte is padded with zero
    if i < data.len() {
        sum += (data[i] as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Compute the IPv4 header checksum. The checksum field must hold zeros.
pub fn ip_checksum(header: &[u8]) -> u16 {
    ones_complement_sum(header)
}

/// Compute a TCP/UDP checksum including the IPv4 pseudo-header.
/// The checksum field within `segment` must hold zeros.
pub fn transport_checksum(segment: &[u8], src: Ipv4Addr, dst: Ipv4Addr, protocol: u8) -> u16 {
    let mut buf = Vec::with_capacity(12 + segment.len());
    buf.extend_from_slice(&src.octets());
    buf.extend_from_slice(&dst.octets());
    buf.push(0);
    buf.push(protocol);
    buf.extend_from_slice(&(segment.len() as u16).to_be_bytes());
    buf.extend_from_slice(segment);
    ones_complement_sum(&buf)
}
