//! Live and offline packet sources, unified behind [`PacketSource`] so the
//! pipeline driver in `bin/cli.rs` doesn't care whether packets come off a
//! live interface or a replayed capture file.

use std::path::Path;

use anyhow::{Context, Result};
use photon::RawPacket;

const ETHERNET_HEADER_LEN: usize = 14;
const ETHERTYPE_IPV4: u16 = 0x0800;
const UDP_HEADER_LEN: usize = 8;

/// Something that yields raw UDP datagrams already addressed to/from the
/// Photon ports this meter cares about.
pub trait PacketSource {
    fn next_packet(&mut self) -> Option<RawPacket>;
}

pub struct LiveCaptureConfig {
    pub interface: String,
    pub bpf_filter: String,
    pub snaplen: i32,
    pub promisc: bool,
    pub timeout_ms: i32,
}

pub struct LiveCapture {
    capture: pcap::Capture<pcap::Active>,
}

impl LiveCapture {
    pub fn open(config: &LiveCaptureConfig) -> Result<Self> {
        let device = pcap::Device::list()
            .context("failed to enumerate capture devices")?
            .into_iter()
            .find(|d| d.name == config.interface)
            .with_context(|| format!("no such capture interface: {}", config.interface))?;

        let mut capture = pcap::Capture::from_device(device)
            .context("failed to open capture device")?
            .snaplen(config.snaplen)
            .promisc(config.promisc)
            .timeout(config.timeout_ms)
            .open()
            .context("failed to activate capture")?;

        capture
            .filter(&config.bpf_filter, true)
            .context("invalid BPF filter")?;

        Ok(Self { capture })
    }

    pub fn list_interfaces() -> Result<Vec<String>> {
        Ok(pcap::Device::list()
            .context("failed to enumerate capture devices")?
            .into_iter()
            .map(|d| d.name)
            .collect())
    }
}

impl PacketSource for LiveCapture {
    fn next_packet(&mut self) -> Option<RawPacket> {
        loop {
            let packet = self.capture.next_packet().ok()?;
            let ts = packet.header.ts.tv_sec as f64 + packet.header.ts.tv_usec as f64 / 1_000_000.0;
            if let Some(raw) = parse_udp_frame(ts, packet.data) {
                return Some(raw);
            }
        }
    }
}

pub struct ReplayCapture {
    capture: pcap::Capture<pcap::Offline>,
}

impl ReplayCapture {
    pub fn open(path: &Path) -> Result<Self> {
        let capture = pcap::Capture::from_file(path)
            .with_context(|| format!("failed to open capture file: {}", path.display()))?;
        Ok(Self { capture })
    }
}

impl PacketSource for ReplayCapture {
    fn next_packet(&mut self) -> Option<RawPacket> {
        loop {
            let packet = self.capture.next_packet().ok()?;
            let ts = packet.header.ts.tv_sec as f64 + packet.header.ts.tv_usec as f64 / 1_000_000.0;
            if let Some(raw) = parse_udp_frame(ts, packet.data) {
                return Some(raw);
            }
        }
    }
}

/// Strips an Ethernet/IPv4/UDP stack off a captured frame. Anything else
/// (non-IPv4, non-UDP, truncated) is skipped by the caller's loop.
fn parse_udp_frame(timestamp: f64, frame: &[u8]) -> Option<RawPacket> {
    if frame.len() < ETHERNET_HEADER_LEN + 20 + UDP_HEADER_LEN {
        return None;
    }
    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    if ethertype != ETHERTYPE_IPV4 {
        return None;
    }
    let ip = &frame[ETHERNET_HEADER_LEN..];
    let version = ip[0] >> 4;
    if version != 4 {
        return None;
    }
    let ihl = (ip[0] & 0x0f) as usize * 4;
    if ip.len() < ihl + UDP_HEADER_LEN {
        return None;
    }
    let protocol = ip[9];
    const PROTO_UDP: u8 = 17;
    if protocol != PROTO_UDP {
        return None;
    }
    let src_ip = format!("{}.{}.{}.{}", ip[12], ip[13], ip[14], ip[15]);
    let dst_ip = format!("{}.{}.{}.{}", ip[16], ip[17], ip[18], ip[19]);

    let udp = &ip[ihl..];
    let src_port = u16::from_be_bytes([udp[0], udp[1]]);
    let dst_port = u16::from_be_bytes([udp[2], udp[3]]);
    let udp_length = u16::from_be_bytes([udp[4], udp[5]]) as usize;
    if udp_length < UDP_HEADER_LEN || udp.len() < udp_length {
        return None;
    }
    let payload = udp[UDP_HEADER_LEN..udp_length].to_vec();

    Some(RawPacket {
        timestamp,
        src_ip,
        src_port,
        dst_ip,
        dst_port,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn udp_frame(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![0u8; ETHERNET_HEADER_LEN];
        frame[12] = 0x08;
        frame[13] = 0x00;

        let udp_len = UDP_HEADER_LEN + payload.len();
        let total_len = 20 + udp_len;
        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        ip[9] = 17;
        ip[2] = (total_len >> 8) as u8;
        ip[3] = (total_len & 0xff) as u8;
        ip[12..16].copy_from_slice(&[10, 0, 0, 5]);
        ip[16..20].copy_from_slice(&[203, 0, 113, 1]);

        let mut udp = vec![0u8; UDP_HEADER_LEN];
        udp[0..2].copy_from_slice(&src_port.to_be_bytes());
        udp[2..4].copy_from_slice(&dst_port.to_be_bytes());
        udp[4..6].copy_from_slice(&(udp_len as u16).to_be_bytes());
        udp.extend_from_slice(payload);

        frame.extend_from_slice(&ip);
        frame.extend_from_slice(&udp);
        frame
    }

    #[test]
    fn parses_udp_over_ethernet_ipv4() {
        let frame = udp_frame(40000, 5056, &[1, 2, 3]);
        let packet = parse_udp_frame(1.5, &frame).expect("should parse");
        assert_eq!(packet.src_port, 40000);
        assert_eq!(packet.dst_port, 5056);
        assert_eq!(packet.dst_ip, "203.0.113.1");
        assert_eq!(packet.payload, vec![1, 2, 3]);
    }

    #[test]
    fn rejects_non_ipv4_ethertype() {
        let mut frame = udp_frame(1, 2, &[]);
        frame[12] = 0x86;
        frame[13] = 0xdd;
        assert!(parse_udp_frame(0.0, &frame).is_none());
    }
}
