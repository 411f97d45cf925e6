mod cli;
mod dns;
mod metrics;
mod pcap;

use crate::pcap::CaptureLoader;
use anyhow::Result;
use clap::Parser;
use cli::Args;
use dns::{Classifier, Watcher};
use log::info;
use metrics::StatsdSink;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.list_interfaces {
        let interfaces = CaptureLoader::list_interfaces()?;
        println!("Available network interfaces:");
        for device in interfaces {
            let status = if device.flags.is_up() { "UP" } else { "DOWN" };
            let running = if device.flags.is_running() {
                "RUNNING"
            } else {
                ""
            };
            let loopback = if device.flags.is_loopback() {
                "LOOPBACK"
            } else {
                ""
            };

            println!("  {} [{}] {} {}", device.name, status, running, loopback);

            if let Some(desc) = device.desc {
                println!("    Description: {desc}");
            }
        }
        return Ok(());
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let source = args.capture_source(CaptureLoader::select_default_interface)?;

    info!("Starting dnswatch");
    info!("Source: {source:?}");
    info!("Statsd: {}", args.statsd);

    let sink = StatsdSink::connect(&args.statsd, args.buffer_lines)?;
    let (capture_handle, event_rx, cancel_token) = CaptureLoader::load(&source)?;

    let classifier = Classifier::new(sink, &args.classifier_config());
    let watcher = Watcher::new(classifier, event_rx, args.flush_interval());

    let shutdown = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping capture...");
            shutdown.cancel();
        }
    });

    // Returns once the capture thread has hung up, so the handle is already done.
    let result = watcher.run().await;
    cancel_token.cancel();
    let _ = capture_handle.await;

    info!("dnswatch stopped");
    result
}
