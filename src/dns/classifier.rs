use super::cache::{CorrelationCache, DEFAULT_TTL};
use super::message::DecodedMessage;
use super::types::{op_code_label, record_type_label, response_code_label};
use crate::metrics::{MetricsSink, Tag};
use crate::pcap::CapturedPacket;
use log::debug;
use std::time::{Duration, Instant};

const SAMPLE_RATE: f64 = 1.0;

pub const QUERY: &str = "dns.query";
pub const QUESTION: &str = "dns.question";
pub const REPLY: &str = "dns.reply";
pub const REPLY_TIME: &str = "dns.reply.time";
pub const REPLY_QUESTION: &str = "dns.reply.question";
pub const ANSWER: &str = "dns.answer";

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// How long a query waits for its reply before it is forgotten.
    pub cache_ttl: Duration,
    /// Attach `query:<name>` to question and answer metrics.
    pub include_query_names: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_TTL,
            include_query_names: true,
        }
    }
}

/// Turns decoded DNS messages into metric events.
///
/// Queries are remembered by transaction ID so the matching reply can report
/// `dns.reply.time`. Sink failures are logged and otherwise ignored.
pub struct Classifier<S> {
    cache: CorrelationCache,
    sink: S,
    include_query_names: bool,
}

impl<S: MetricsSink> Classifier<S> {
    pub fn new(sink: S, config: &ClassifierConfig) -> Self {
        Self {
            cache: CorrelationCache::new(config.cache_ttl),
            sink,
            include_query_names: config.include_query_names,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Decode and classify one captured payload. Undecodable payloads are skipped.
    pub fn handle_packet(&self, packet: &CapturedPacket) {
        match DecodedMessage::decode(&packet.payload) {
            Ok(message) => self.classify(&message, packet.observed_at),
            Err(e) => debug!(
                "packet error: {e} ({} bytes, {} -> {})",
                packet.payload.len(),
                packet.src_port,
                packet.dst_port
            ),
        }
    }

    /// Emit metrics for `message`, observed at `now`.
    pub fn classify(&self, message: &DecodedMessage, now: Instant) {
        if message.is_response {
            self.reply(message, now);
        } else {
            self.query(message, now);
        }
    }

    fn reply(&self, message: &DecodedMessage, now: Instant) {
        let tags = vec![Tag::new(
            "response_code",
            response_code_label(message.response_code),
        )];
        self.count(REPLY, &tags);

        match self.cache.get(message.id, now) {
            Some(start) => {
                let elapsed_ms = now.saturating_duration_since(start).as_secs_f64() * 1000.0;
                if let Err(e) = self.sink.histogram(REPLY_TIME, elapsed_ms, &tags, SAMPLE_RATE) {
                    debug!("Failed to send {REPLY_TIME}: {e}");
                }
            }
            None => debug!("{} not in cache", message.id),
        }

        for question in &message.questions {
            let tags = self.name_tags(&tags, &question.name, question.record_type);
            self.count(REPLY_QUESTION, &tags);
        }

        for answer in &message.answers {
            let tags = self.name_tags(&tags, &answer.name, answer.record_type);
            self.count(ANSWER, &tags);
        }
    }

    fn query(&self, message: &DecodedMessage, now: Instant) {
        // Must land before any emission so a fast reply always finds it.
        self.cache.put(message.id, now);

        let tags = vec![Tag::new("op_code", op_code_label(message.op_code))];
        self.count(QUERY, &tags);

        for question in &message.questions {
            let tags = self.name_tags(&tags, &question.name, question.record_type);
            self.count(QUESTION, &tags);
        }
    }

    fn name_tags(&self, base: &[Tag], name: &str, record_type: u16) -> Vec<Tag> {
        let mut tags = Vec::with_capacity(base.len() + 2);
        tags.extend_from_slice(base);
        if self.include_query_names {
            tags.push(Tag::new("query", name));
        }
        tags.push(Tag::new("query_type", record_type_label(record_type)));
        tags
    }

    fn count(&self, name: &str, tags: &[Tag]) {
        if let Err(e) = self.sink.count(name, 1, tags, SAMPLE_RATE) {
            debug!("Failed to send {name}: {e}");
        }
    }
}
