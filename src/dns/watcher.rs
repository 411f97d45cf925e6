use super::classifier::Classifier;
use crate::metrics::MetricsSink;
use crate::pcap::CaptureEvent;
use anyhow::Result;
use log::{debug, info};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// Feeds captured packets to a `Classifier`, one at a time, in capture order.
pub struct Watcher<S> {
    classifier: Classifier<S>,
    rx: mpsc::Receiver<CaptureEvent>,
    flush_interval: Duration,
}

impl<S: MetricsSink> Watcher<S> {
    pub fn new(
        classifier: Classifier<S>,
        rx: mpsc::Receiver<CaptureEvent>,
        flush_interval: Duration,
    ) -> Self {
        Self {
            classifier,
            rx,
            flush_interval,
        }
    }

    /// Run until the capture ends (`Ok`) or fails (`Err`).
    ///
    /// The sink is flushed every `flush_interval` and once more on the way out.
    pub async fn run(mut self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut handled: u64 = 0;
        let result = loop {
            tokio::select! {
                event = self.rx.recv() => match event {
                    Some(Ok(packet)) => {
                        self.classifier.handle_packet(&packet);
                        handled += 1;
                    }
                    Some(Err(e)) => break Err(e.into()),
                    None => break Ok(()),
                },
                _ = ticker.tick() => self.flush(),
            }
        };

        self.flush();
        info!("Watch stopped after {handled} packets");
        result
    }

    fn flush(&self) {
        if let Err(e) = self.classifier.sink().flush() {
            debug!("Failed to flush metrics: {e}");
        }
    }
}
