use super::{MetricsError, MetricsSink, Tag};
use anyhow::{Context, Result};
use log::debug;
use std::fmt::Write;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Mutex;

/// Largest payload that fits an Ethernet frame without IP fragmentation.
const MAX_DATAGRAM: usize = 1432;

struct Buffer {
    payload: String,
    lines: usize,
}

/// DogStatsD client over UDP.
///
/// Lines are batched into newline-separated datagrams of up to `max_lines`
/// lines. A full batch is sent immediately; a partial one waits for `flush`.
pub struct StatsdSink {
    socket: UdpSocket,
    max_lines: usize,
    buffer: Mutex<Buffer>,
}

impl StatsdSink {
    pub fn connect(addr: &str, max_lines: usize) -> Result<Self> {
        let target: SocketAddr = addr
            .to_socket_addrs()
            .with_context(|| format!("Invalid statsd address {addr}"))?
            .next()
            .with_context(|| format!("Statsd address {addr} did not resolve"))?;

        let bind: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind).context("Failed to bind statsd socket")?;
        socket
            .connect(target)
            .with_context(|| format!("Failed to connect statsd socket to {target}"))?;
        // A full socket buffer drops the batch rather than stalling classification.
        socket.set_nonblocking(true)?;

        debug!("Sending metrics to {target}");

        Ok(Self {
            socket,
            max_lines: max_lines.max(1),
            buffer: Mutex::new(Buffer {
                payload: String::with_capacity(MAX_DATAGRAM),
                lines: 0,
            }),
        })
    }

    fn submit(&self, line: String) -> Result<(), MetricsError> {
        let mut buffer = self.buffer.lock().map_err(|_| MetricsError::Poisoned)?;

        if buffer.lines > 0 && buffer.payload.len() + 1 + line.len() > MAX_DATAGRAM {
            self.send(&mut buffer)?;
        }
        if buffer.lines > 0 {
            buffer.payload.push('\n');
        }
        buffer.payload.push_str(&line);
        buffer.lines += 1;

        if buffer.lines >= self.max_lines {
            self.send(&mut buffer)?;
        }
        Ok(())
    }

    fn send(&self, buffer: &mut Buffer) -> Result<(), MetricsError> {
        if buffer.lines == 0 {
            return Ok(());
        }
        let result = self.socket.send(buffer.payload.as_bytes());
        buffer.payload.clear();
        buffer.lines = 0;
        result?;
        Ok(())
    }
}

/// Render one DogStatsD line: `name:value|type[|@rate][|#tag,tag]`.
fn format_line(
    name: &str,
    value: impl std::fmt::Display,
    kind: &str,
    tags: &[Tag],
    rate: f64,
) -> String {
    let mut line = format!("{name}:{value}|{kind}");
    if rate < 1.0 {
        let _ = write!(line, "|@{rate}");
    }
    for (i, tag) in tags.iter().enumerate() {
        line.push_str(if i == 0 { "|#" } else { "," });
        let _ = write!(line, "{tag}");
    }
    line
}

impl MetricsSink for StatsdSink {
    fn count(&self, name: &str, value: i64, tags: &[Tag], rate: f64) -> Result<(), MetricsError> {
        self.submit(format_line(name, value, "c", tags, rate))
    }

    fn histogram(
        &self,
        name: &str,
        value: f64,
        tags: &[Tag],
        rate: f64,
    ) -> Result<(), MetricsError> {
        self.submit(format_line(name, value, "h", tags, rate))
    }

    fn flush(&self) -> Result<(), MetricsError> {
        let mut buffer = self.buffer.lock().map_err(|_| MetricsError::Poisoned)?;
        self.send(&mut buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn collector() -> (UdpSocket, String) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let addr = socket.local_addr().unwrap().to_string();
        (socket, addr)
    }

    fn recv(socket: &UdpSocket) -> String {
        let mut buf = [0u8; 2048];
        let n = socket.recv(&mut buf).unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    #[test]
    fn line_format() {
        let tags = [Tag::new("response_code", "OK"), Tag::new("query", "example.com")];
        assert_eq!(
            format_line("dns.reply", 1, "c", &tags, 1.0),
            "dns.reply:1|c|#response_code:OK,query:example.com"
        );
        assert_eq!(format_line("dns.reply.time", 12.5, "h", &[], 1.0), "dns.reply.time:12.5|h");
        assert_eq!(format_line("dns.query", 1, "c", &[], 0.5), "dns.query:1|c|@0.5");
    }

    #[test]
    fn batches_until_full() {
        let (server, addr) = collector();
        let sink = StatsdSink::connect(&addr, 2).unwrap();

        sink.count("dns.query", 1, &[Tag::new("op_code", "Query")], 1.0)
            .unwrap();
        sink.histogram("dns.reply.time", 3.25, &[], 1.0).unwrap();

        assert_eq!(
            recv(&server),
            "dns.query:1|c|#op_code:Query\ndns.reply.time:3.25|h"
        );
    }

    #[test]
    fn flush_sends_partial_batch() {
        let (server, addr) = collector();
        let sink = StatsdSink::connect(&addr, 100).unwrap();

        sink.count("dns.reply", 1, &[], 1.0).unwrap();
        sink.flush().unwrap();
        assert_eq!(recv(&server), "dns.reply:1|c");

        // nothing buffered, nothing sent
        sink.flush().unwrap();
        server
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        let mut buf = [0u8; 64];
        assert!(server.recv(&mut buf).is_err());
    }

    #[test]
    fn rejects_bad_address() {
        assert!(StatsdSink::connect("not an address", 10).is_err());
    }
}
