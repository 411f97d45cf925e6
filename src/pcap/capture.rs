use anyhow::{Context, Result, bail};
use bytes::Bytes;
use log::{debug, info, warn};
use pcap::{Activated, Capture, Device, Error, Linktype, PacketHeader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const DNS_PORT: u16 = 53;
const BPF_FILTER: &str = "udp port 53";
const SNAPLEN: i32 = 1600;
const READ_TIMEOUT_MS: i32 = 100;
const CHANNEL_CAPACITY: usize = 10000;

/// A UDP payload seen on port 53, stamped with when it was captured.
#[derive(Debug, Clone)]
pub struct CapturedPacket {
    pub payload: Bytes,
    pub observed_at: Instant,
    pub src_port: u16,
    pub dst_port: u16,
}

/// Capture failure that ends the watch.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("packet capture failed: {0}")]
    Pcap(#[from] Error),
}

pub type CaptureEvent = Result<CapturedPacket, CaptureError>;

/// Where packets come from.
#[derive(Debug, Clone)]
pub enum CaptureSource {
    Live(String),
    File(PathBuf),
}

pub struct CaptureLoader;

impl CaptureLoader {
    pub fn list_interfaces() -> Result<Vec<Device>> {
        Ok(Device::list()?)
    }

    /// First device that is up, running and not loopback, else the first one up.
    pub fn select_default_interface() -> Result<String> {
        let devices = Device::list()?;
        let candidates = || devices.iter().filter(|d| d.name != "any");

        if let Some(device) = candidates()
            .find(|d| !d.flags.is_loopback() && d.flags.is_up() && d.flags.is_running())
        {
            return Ok(device.name.clone());
        }
        if let Some(device) = candidates().find(|d| d.flags.is_up()) {
            return Ok(device.name.clone());
        }

        bail!("No suitable network interface found")
    }

    /// Open `source` and start forwarding DNS payloads on a blocking thread.
    ///
    /// The receiver yields packets in capture order. It ends after the
    /// savefile is exhausted, after the token is cancelled, or right after a
    /// fatal `CaptureError` has been delivered.
    pub fn load(
        source: &CaptureSource,
    ) -> Result<(JoinHandle<()>, mpsc::Receiver<CaptureEvent>, CancellationToken)> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel_token = CancellationToken::new();

        let should_stop = Arc::new(AtomicBool::new(false));
        let should_stop_clone = should_stop.clone();

        let handle = match source {
            CaptureSource::Live(interface) => {
                let cap = open_live(interface)?;
                tokio::task::spawn_blocking(move || forward(cap, &tx, &should_stop_clone))
            }
            CaptureSource::File(path) => {
                let cap = open_file(path)?;
                tokio::task::spawn_blocking(move || forward(cap, &tx, &should_stop_clone))
            }
        };

        let token_clone = cancel_token.clone();
        tokio::spawn(async move {
            token_clone.cancelled().await;
            should_stop.store(true, Ordering::Relaxed);
        });

        Ok((handle, rx, cancel_token))
    }
}

fn open_live(interface: &str) -> Result<Capture<pcap::Active>> {
    info!("Opening capture on interface: {interface}");

    let device = if interface == "any" {
        Device::from("any")
    } else {
        Device::list()?
            .into_iter()
            .find(|d| d.name == interface)
            .with_context(|| format!("Interface {interface} not found"))?
    };

    let mut cap = Capture::from_device(device)?
        .promisc(true)
        .snaplen(SNAPLEN)
        .immediate_mode(true)
        .timeout(READ_TIMEOUT_MS)
        .open()
        .with_context(|| format!("Failed to open capture on {interface}"))?;
    cap.filter(BPF_FILTER, true)?;

    info!("Capture started on interface: {interface}");
    Ok(cap)
}

fn open_file(path: &Path) -> Result<Capture<pcap::Offline>> {
    info!("Reading packets from {}", path.display());

    let mut cap = Capture::from_file(path)
        .with_context(|| format!("Failed to open savefile {}", path.display()))?;
    cap.filter(BPF_FILTER, true)?;
    Ok(cap)
}

fn forward<T: Activated + ?Sized>(
    mut cap: Capture<T>,
    tx: &mpsc::Sender<CaptureEvent>,
    should_stop: &AtomicBool,
) {
    let linktype = cap.get_datalink();
    let mut clock = CaptureClock::default();

    while !should_stop.load(Ordering::Relaxed) {
        match cap.next_packet() {
            Ok(packet) => {
                let Some(datagram) = parse_frame(linktype, packet.data) else {
                    debug!("Ignoring non-DNS frame of {} bytes", packet.data.len());
                    continue;
                };

                let event = CapturedPacket {
                    payload: Bytes::copy_from_slice(datagram.payload),
                    observed_at: clock.instant(packet.header),
                    src_port: datagram.src_port,
                    dst_port: datagram.dst_port,
                };
                if tx.blocking_send(Ok(event)).is_err() {
                    info!("Channel closed, stopping capture");
                    break;
                }
            }
            Err(Error::TimeoutExpired) => continue,
            Err(Error::NoMorePackets) => {
                info!("End of capture reached");
                break;
            }
            Err(e) => {
                warn!("Error reading packet: {e}");
                let _ = tx.blocking_send(Err(e.into()));
                break;
            }
        }
    }
    info!("Packet capture task terminated");
}

/// Maps pcap header timestamps onto the monotonic clock.
///
/// The first packet anchors capture time to `Instant::now()`; later packets
/// are placed by their offset from it. Replayed savefiles keep their original
/// spacing this way, and live latencies use kernel timestamps rather than the
/// time the packet reached this thread.
#[derive(Default)]
struct CaptureClock {
    anchor: Option<(i64, Instant)>,
}

impl CaptureClock {
    fn instant(&mut self, header: &PacketHeader) -> Instant {
        let micros = (header.ts.tv_sec as i64)
            .saturating_mul(1_000_000)
            .saturating_add(header.ts.tv_usec as i64);
        self.at_micros(micros)
    }

    fn at_micros(&mut self, micros: i64) -> Instant {
        let (base, anchor) = *self.anchor.get_or_insert_with(|| (micros, Instant::now()));
        // Timestamps may step backwards; clamp to the anchor.
        let offset = u64::try_from(micros - base).unwrap_or(0);
        anchor + Duration::from_micros(offset)
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Datagram<'a> {
    src_port: u16,
    dst_port: u16,
    payload: &'a [u8],
}

/// Strip link, network and transport headers down to the DNS payload.
///
/// Supported link types: Ethernet (with one 802.1Q tag), Linux cooked
/// capture (the `any` device), BSD loopback and raw IP.
fn parse_frame(linktype: Linktype, data: &[u8]) -> Option<Datagram<'_>> {
    let ip = match linktype.0 {
        // DLT_NULL: 4-byte host-order address family
        0 => {
            let family = u32::from_ne_bytes(data.get(..4)?.try_into().ok()?);
            match family {
                2 | 24 | 28 | 30 => &data[4..],
                _ => return None,
            }
        }
        // DLT_EN10MB
        1 => {
            let mut ether_type = u16::from_be_bytes([*data.get(12)?, *data.get(13)?]);
            let mut offset = 14;
            if ether_type == 0x8100 {
                ether_type = u16::from_be_bytes([*data.get(16)?, *data.get(17)?]);
                offset = 18;
            }
            if ether_type != 0x0800 && ether_type != 0x86DD {
                return None;
            }
            data.get(offset..)?
        }
        // DLT_RAW (both historical values) and LINKTYPE_RAW
        12 | 14 | 101 => data,
        // DLT_LINUX_SLL
        113 => {
            let protocol = u16::from_be_bytes([*data.get(14)?, *data.get(15)?]);
            if protocol != 0x0800 && protocol != 0x86DD {
                return None;
            }
            data.get(16..)?
        }
        _ => return None,
    };

    let udp = match ip.first()? >> 4 {
        4 => parse_ipv4(ip)?,
        6 => parse_ipv6(ip)?,
        _ => return None,
    };
    parse_udp(udp)
}

/// Parse IPv4 header (RFC 791), returning the UDP segment.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |Version|  IHL  |Type of Service|          Total Length         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |         Identification        |Flags|      Fragment Offset    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Time to Live |    Protocol   |         Header Checksum       |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Non-first fragments carry no UDP header and are dropped.
fn parse_ipv4(data: &[u8]) -> Option<&[u8]> {
    if data.len() < 20 || data[9] != 17 {
        return None;
    }
    let fragment_offset = u16::from_be_bytes([data[6], data[7]]) & 0x1FFF;
    if fragment_offset != 0 {
        return None;
    }
    let ihl = (data[0] & 0x0F) as usize * 4;
    if ihl < 20 {
        return None;
    }
    data.get(ihl..)
}

/// Parse IPv6 fixed header (RFC 8200). Extension headers are not followed.
fn parse_ipv6(data: &[u8]) -> Option<&[u8]> {
    if data.len() < 40 || data[6] != 17 {
        return None;
    }
    data.get(40..)
}

/// Parse UDP header (RFC 768) and keep datagrams to or from port 53.
///
/// The payload is cut at the UDP length so link-layer padding is dropped.
fn parse_udp(data: &[u8]) -> Option<Datagram<'_>> {
    if data.len() < 8 {
        return None;
    }
    let src_port = u16::from_be_bytes([data[0], data[1]]);
    let dst_port = u16::from_be_bytes([data[2], data[3]]);
    if src_port != DNS_PORT && dst_port != DNS_PORT {
        return None;
    }

    let length = u16::from_be_bytes([data[4], data[5]]) as usize;
    let end = if length >= 8 { length.min(data.len()) } else { data.len() };

    Some(Datagram {
        src_port,
        dst_port,
        payload: &data[8..end],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ETHERNET: Linktype = Linktype(1);

    fn udp(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
        let mut seg = Vec::new();
        seg.extend_from_slice(&src_port.to_be_bytes());
        seg.extend_from_slice(&dst_port.to_be_bytes());
        seg.extend_from_slice(&((payload.len() + 8) as u16).to_be_bytes());
        seg.extend_from_slice(&[0, 0]);
        seg.extend_from_slice(payload);
        seg
    }

    fn ipv4(protocol: u8, segment: &[u8]) -> Vec<u8> {
        let mut ip = vec![0x45, 0, 0, 0, 0, 0, 0, 0, 64, protocol, 0, 0];
        ip.extend_from_slice(&[10, 0, 0, 1, 10, 0, 0, 2]);
        ip.extend_from_slice(segment);
        ip
    }

    fn ethernet(ether_type: u16, body: &[u8]) -> Vec<u8> {
        let mut frame = vec![0u8; 12];
        frame.extend_from_slice(&ether_type.to_be_bytes());
        frame.extend_from_slice(body);
        frame
    }

    #[test]
    fn ethernet_ipv4_query() {
        let frame = ethernet(0x0800, &ipv4(17, &udp(40000, 53, b"dns")));
        assert_eq!(
            parse_frame(ETHERNET, &frame),
            Some(Datagram {
                src_port: 40000,
                dst_port: 53,
                payload: b"dns",
            })
        );
    }

    #[test]
    fn strips_ethernet_padding() {
        let mut frame = ethernet(0x0800, &ipv4(17, &udp(53, 40000, b"reply")));
        frame.extend_from_slice(&[0u8; 6]);
        assert_eq!(parse_frame(ETHERNET, &frame).unwrap().payload, b"reply");
    }

    #[test]
    fn vlan_tagged_frame() {
        let inner = ipv4(17, &udp(53, 1234, b"x"));
        let mut body = vec![0x00, 0x0A, 0x08, 0x00];
        body.extend_from_slice(&inner);
        let frame = ethernet(0x8100, &body);
        assert_eq!(parse_frame(ETHERNET, &frame).unwrap().src_port, 53);
    }

    #[test]
    fn ipv6_over_linux_cooked() {
        let mut ip = vec![0x60, 0, 0, 0, 0, 0, 17, 64];
        ip.extend_from_slice(&[0u8; 32]);
        ip.extend_from_slice(&udp(5353, 53, b"v6"));
        let mut frame = vec![0u8; 14];
        frame.extend_from_slice(&0x86DDu16.to_be_bytes());
        frame.extend_from_slice(&ip);
        assert_eq!(parse_frame(Linktype(113), &frame).unwrap().payload, b"v6");
    }

    #[test]
    fn ignores_other_traffic() {
        // TCP
        let frame = ethernet(0x0800, &ipv4(6, &udp(53, 53, b"x")));
        assert_eq!(parse_frame(ETHERNET, &frame), None);
        // UDP on other ports
        let frame = ethernet(0x0800, &ipv4(17, &udp(123, 123, b"ntp")));
        assert_eq!(parse_frame(ETHERNET, &frame), None);
        // ARP
        assert_eq!(parse_frame(ETHERNET, &ethernet(0x0806, &[0u8; 28])), None);
        // runt
        assert_eq!(parse_frame(ETHERNET, &[0u8; 10]), None);
    }

    #[test]
    fn drops_trailing_fragments() {
        let mut ip = ipv4(17, &udp(53, 1, b"x"));
        ip[7] = 0x10;
        assert_eq!(parse_frame(Linktype(101), &ip), None);
    }

    #[test]
    fn clock_keeps_capture_spacing() {
        let mut clock = CaptureClock::default();
        let first = clock.at_micros(1_000_000);
        let second = clock.at_micros(1_025_000);
        assert_eq!(second - first, Duration::from_millis(25));
        assert_eq!(clock.at_micros(999_000), first);
    }
}
