use crate::dns::ClassifierConfig;
use crate::pcap::CaptureSource;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "dnswatch")]
#[command(about = "Watch DNS traffic and report query/reply metrics to statsd", long_about = None)]
pub struct Args {
    /// Interface to listen on (default: first active non-loopback device)
    #[arg(short, long, conflicts_with = "read")]
    pub interface: Option<String>,

    /// Replay packets from a pcap savefile instead of a live interface
    #[arg(short, long, value_name = "FILE")]
    pub read: Option<PathBuf>,

    /// Statsd address
    #[arg(short, long, default_value = "127.0.0.1:8125")]
    pub statsd: String,

    /// How long a query waits for its reply, in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub cache_ttl_ms: u64,

    /// Metric lines per statsd datagram
    #[arg(long, default_value_t = 100)]
    pub buffer_lines: usize,

    /// Interval between flushes of partially filled datagrams, in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub flush_interval_ms: u64,

    /// Leave query names out of the tags
    #[arg(long)]
    pub no_query_names: bool,

    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    #[arg(long)]
    pub list_interfaces: bool,
}

impl Args {
    pub fn classifier_config(&self) -> ClassifierConfig {
        ClassifierConfig {
            cache_ttl: Duration::from_millis(self.cache_ttl_ms),
            include_query_names: !self.no_query_names,
        }
    }

    pub fn flush_interval(&self) -> Duration {
        // tokio's interval panics on zero
        Duration::from_millis(self.flush_interval_ms.max(1))
    }

    /// The savefile if one was given, else `interface`.
    pub fn capture_source(
        &self,
        interface: impl FnOnce() -> anyhow::Result<String>,
    ) -> anyhow::Result<CaptureSource> {
        if let Some(path) = &self.read {
            return Ok(CaptureSource::File(path.clone()));
        }
        let name = match &self.interface {
            Some(name) => name.clone(),
            None => interface()?,
        };
        Ok(CaptureSource::Live(name))
    }
}
