//! Link-layer capture worker
//!
//! Each scenario runs under a dedicated capture thread that owns a
//! filtered pcap handle and has exclusive write access to a fresh trace
//! file until it is stopped. Records are flushed one by one, so an abrupt
//! shutdown can truncate at most the record being written.

use std::fs::File;
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};

use crate::common::{Error, Result};

/// Capture filter covering traffic between the two reserved test networks.
pub const CAPTURE_FILTER: &str = "net 192.18.0.0/15 and net 192.0.2.0/24";

/// One capture event in its on-disk form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRecord {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub id: u16,
    pub ttl: u8,
    pub data: String,
}

/// Handle to a running capture worker.
///
/// The worker shares nothing with the orchestrator beyond the stop flag;
/// the trace file is read only after [`CaptureTask::stop`] returns.
pub struct CaptureTask {
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    path: PathBuf,
    grace: Duration,
}

impl CaptureTask {
    /// Open a filtered nonblocking capture on `interface` and start
    /// recording into a fresh temporary trace file.
    pub fn start(interface: &str, filter: &str, grace: Duration) -> Result<CaptureTask> {
        let (file, path) = tempfile::Builder::new()
            .prefix("decoyd-trace-")
            .tempfile()?
            .keep()
            .map_err(|e| Error::Io(e.error))?;

        let open_err = |reason: String| Error::CaptureOpen {
            interface: interface.to_string(),
            reason,
        };

        let cap = pcap::Capture::from_device(interface)
            .map_err(|e| open_err(e.to_string()))?
            .immediate_mode(true)
            .snaplen(65535)
            .open()
            .map_err(|e| open_err(e.to_string()))?;
        let mut cap = cap.setnonblock().map_err(|e| open_err(e.to_string()))?;
        cap.filter(filter, true).map_err(|e| open_err(e.to_string()))?;

        let link = cap.get_datalink();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_worker = stop.clone();
        debug!(interface, file = %path.display(), "starting packet capture");

        let worker = std::thread::spawn(move || capture_loop(cap, link, file, stop_worker));

        Ok(CaptureTask {
            stop,
            worker: Some(worker),
            path,
            grace,
        })
    }

    /// Trace file the worker is writing to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop the worker and return the finished trace file path.
    ///
    /// Sleeps the grace delay before signalling the worker, so in-flight
    /// packets still land, and again after it has exited, so the file is
    /// complete and closed before anyone compares it.
    pub async fn stop(mut self) -> PathBuf {
        tokio::time::sleep(self.grace).await;
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("capture worker panicked");
            }
        }
        tokio::time::sleep(self.grace).await;
        self.path.clone()
    }
}

impl Drop for CaptureTask {
    fn drop(&mut self) {
        // Abandoned mid-scenario (daemon failed to start, injection
        // error): the worker must not outlive its scenario
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn capture_loop(
    mut cap: pcap::Capture<pcap::Active>,
    link: pcap::Linktype,
    mut file: File,
    stop: Arc<AtomicBool>,
) {
    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        match cap.next_packet() {
            Ok(packet) => {
                if let Some(record) = decode(link, packet.data) {
                    if let Err(err) = write_record(&mut file, &record) {
                        warn!("trace write failed: {err}");
                        break;
                    }
                }
            }
            Err(pcap::Error::TimeoutExpired) => {
                std::thread::sleep(Duration::from_millis(10));
            }
            Err(pcap::Error::NoMorePackets) => break,
            Err(err) => {
                debug!("capture read error: {err}");
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }
    let _ = file.flush();
}

/// Append one record and flush it, so every record is durable before the
/// next capture event is processed.
fn write_record(file: &mut File, record: &TraceRecord) -> std::io::Result<()> {
    write!(
        file,
        "SRC={}\nDST={}\nID={}\nTTL={}\nDATA={}\n\n",
        record.src, record.dst, record.id, record.ttl, record.data
    )?;
    file.flush()
}

/// Strip the link-layer header and decode the IPv4 datagram beneath it.
pub fn decode(link: pcap::Linktype, frame: &[u8]) -> Option<TraceRecord> {
    let offset = match link {
        pcap::Linktype::ETHERNET => {
            if frame.len() < 14 {
                return None;
            }
            match u16::from_be_bytes([frame[12], frame[13]]) {
                0x0800 => 14,
                // 802.1Q tag
                0x8100 => {
                    if frame.len() < 18 || u16::from_be_bytes([frame[16], frame[17]]) != 0x0800 {
                        return None;
                    }
                    18
                }
                _ => return None,
            }
        }
        // BSD loopback framing: 4-byte address family
        pcap::Linktype::NULL | pcap::Linktype::LOOP => 4,
        // Anything else is treated as raw IP framing
        _ => 0,
    };
    decode_ipv4(frame.get(offset..)?)
}

/// Decode an IPv4 datagram into its trace record.
pub fn decode_ipv4(data: &[u8]) -> Option<TraceRecord> {
    if data.len() < 20 || data[0] >> 4 != 4 {
        return None;
    }
    let ihl = (data[0] & 0x0f) as usize * 4;
    if ihl < 20 || data.len() < ihl {
        return None;
    }
    let total_len = u16::from_be_bytes([data[2], data[3]]) as usize;
    let end = total_len.clamp(ihl, data.len());

    let id = u16::from_be_bytes([data[4], data[5]]);
    let ttl = data[8];
    let protocol = data[9];
    let src = Ipv4Addr::new(data[12], data[13], data[14], data[15]);
    let dst = Ipv4Addr::new(data[16], data[17], data[18], data[19]);

    Some(TraceRecord {
        src,
        dst,
        id,
        ttl,
        data: render_payload(protocol, &data[ihl..end]),
    })
}

/// Deterministic textual rendering of the IP payload.
///
/// Fixtures depend on this byte-for-byte; any change here invalidates
/// every recorded trace.
pub fn render_payload(protocol: u8, payload: &[u8]) -> String {
    match protocol {
        6 if payload.len() >= 20 => {
            let sport = u16::from_be_bytes([payload[0], payload[1]]);
            let dport = u16::from_be_bytes([payload[2], payload[3]]);
            let seq = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
            let ack = u32::from_be_bytes([payload[8], payload[9], payload[10], payload[11]]);
            let offset = ((payload[12] >> 4) as usize * 4).min(payload.len());
            let flags = tcp_flags_string(payload[13]);
            let window = u16::from_be_bytes([payload[14], payload[15]]);
            let head = format!(
                "TCP(sport={sport}, dport={dport}, seq={seq}, ack={ack}, flags={flags}, win={window})"
            );
            with_body(head, &payload[offset..])
        }
        17 if payload.len() >= 8 => {
            let sport = u16::from_be_bytes([payload[0], payload[1]]);
            let dport = u16::from_be_bytes([payload[2], payload[3]]);
            let len = u16::from_be_bytes([payload[4], payload[5]]);
            let head = format!("UDP(sport={sport}, dport={dport}, len={len})");
            with_body(head, &payload[8..])
        }
        1 if payload.len() >= 4 => {
            let head = format!("ICMP(type={}, code={})", payload[0], payload[1]);
            with_body(head, &payload[4..])
        }
        other => with_body(format!("RAW(proto={other})"), payload),
    }
}

fn with_body(head: String, body: &[u8]) -> String {
    if body.is_empty() {
        head
    } else {
        format!("{head}/{}", hex_string(body))
    }
}

fn hex_string(data: &[u8]) -> String {
    data.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn tcp_flags_string(flags: u8) -> String {
    const NAMES: [(u8, char); 8] = [
        (0x80, 'C'),
        (0x40, 'E'),
        (0x20, 'U'),
        (0x10, 'A'),
        (0x08, 'P'),
        (0x04, 'R'),
        (0x02, 'S'),
        (0x01, 'F'),
    ];
    let rendered: String = NAMES
        .iter()
        .filter(|(bit, _)| flags & bit != 0)
        .map(|(_, letter)| *letter)
        .collect();
    if rendered.is_empty() {
        "-".to_string()
    } else {
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{PacketSpec, Transport};

    fn build(transport: Transport) -> Vec<u8> {
        PacketSpec {
            src: Ipv4Addr::new(192, 0, 2, 100),
            dst: Ipv4Addr::new(192, 18, 0, 10),
            ttl: 64,
            id: 4660,
            transport,
        }
        .to_bytes()
        .unwrap()
    }

    #[test]
    fn built_syn_decodes_into_matching_record() {
        let bytes = build(Transport::Tcp {
            src_port: 4242,
            dst_port: 23,
            seq: 1,
            ack: 0,
            flags: "S".to_string(),
            window: 8192,
            payload: None,
        });

        let record = decode_ipv4(&bytes).unwrap();
        assert_eq!(record.src, Ipv4Addr::new(192, 0, 2, 100));
        assert_eq!(record.dst, Ipv4Addr::new(192, 18, 0, 10));
        assert_eq!(record.id, 4660);
        assert_eq!(record.ttl, 64);
        assert_eq!(
            record.data,
            "TCP(sport=4242, dport=23, seq=1, ack=0, flags=S, win=8192)"
        );
    }

    #[test]
    fn ethernet_and_vlan_framing_reach_the_ip_layer() {
        let ip = build(Transport::Udp {
            src_port: 5353,
            dst_port: 161,
            payload: None,
        });

        let mut ethernet = vec![0u8; 12];
        ethernet.extend_from_slice(&[0x08, 0x00]);
        ethernet.extend_from_slice(&ip);
        assert!(decode(pcap::Linktype::ETHERNET, &ethernet).is_some());

        let mut vlan = vec![0u8; 12];
        vlan.extend_from_slice(&[0x81, 0x00, 0x00, 0x64, 0x08, 0x00]);
        vlan.extend_from_slice(&ip);
        assert!(decode(pcap::Linktype::ETHERNET, &vlan).is_some());

        let mut null_framed = vec![2, 0, 0, 0]; // AF_INET
        null_framed.extend_from_slice(&ip);
        assert!(decode(pcap::Linktype::NULL, &null_framed).is_some());
    }

    #[test]
    fn non_ip_frames_are_skipped() {
        // ARP ethertype
        let mut frame = vec![0u8; 14];
        frame[12] = 0x08;
        frame[13] = 0x06;
        assert!(decode(pcap::Linktype::ETHERNET, &frame).is_none());
        assert!(decode_ipv4(&[0u8; 10]).is_none());
    }

    #[test]
    fn udp_payload_renders_with_hex_body() {
        let bytes = build(Transport::Udp {
            src_port: 53,
            dst_port: 1024,
            payload: Some(crate::packet::Payload::Hex("c0ffee".to_string())),
        });
        let record = decode_ipv4(&bytes).unwrap();
        assert_eq!(record.data, "UDP(sport=53, dport=1024, len=11)/c0ffee");
    }

    #[test]
    fn syn_ack_flags_render_in_fixed_order() {
        assert_eq!(tcp_flags_string(0x12), "AS");
        assert_eq!(tcp_flags_string(0x02), "S");
        assert_eq!(tcp_flags_string(0x00), "-");
        assert_eq!(tcp_flags_string(0x29), "UPF");
    }

    #[test]
    fn record_block_layout_is_line_oriented() {
        let record = TraceRecord {
            src: Ipv4Addr::new(192, 18, 0, 10),
            dst: Ipv4Addr::new(192, 0, 2, 100),
            id: 0,
            ttl: 64,
            data: "TCP(sport=23, dport=4242, seq=0, ack=2, flags=AS, win=65535)".to_string(),
        };
        let mut file = tempfile::tempfile().unwrap();
        write_record(&mut file, &record).unwrap();

        use std::io::{Read, Seek};
        let mut rendered = String::new();
        file.rewind().unwrap();
        file.read_to_string(&mut rendered).unwrap();
        assert_eq!(
            rendered,
            "SRC=192.18.0.10\nDST=192.0.2.100\nID=0\nTTL=64\n\
             DATA=TCP(sport=23, dport=4242, seq=0, ack=2, flags=AS, win=65535)\n\n"
        );
    }
}
