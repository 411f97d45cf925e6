mod statsd;

pub use statsd::StatsdSink;

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("statsd send failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("sink lock poisoned")]
    Poisoned,
}

/// A `key:value` pair attached to a metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: &'static str,
    pub value: String,
}

impl Tag {
    pub fn new(key: &'static str, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.key, self.value)
    }
}

/// Destination for metric events.
///
/// Implementations may buffer; callers treat every call as best effort.
pub trait MetricsSink {
    fn count(&self, name: &str, value: i64, tags: &[Tag], rate: f64) -> Result<(), MetricsError>;

    fn histogram(&self, name: &str, value: f64, tags: &[Tag], rate: f64)
        -> Result<(), MetricsError>;

    fn flush(&self) -> Result<(), MetricsError> {
        Ok(())
    }
}

impl<T: MetricsSink + ?Sized> MetricsSink for Arc<T> {
    fn count(&self, name: &str, value: i64, tags: &[Tag], rate: f64) -> Result<(), MetricsError> {
        (**self).count(name, value, tags, rate)
    }

    fn histogram(&self, name: &str, value: f64, tags: &[Tag], rate: f64) -> Result<(), MetricsError> {
        (**self).histogram(name, value, tags, rate)
    }

    fn flush(&self) -> Result<(), MetricsError> {
        (**self).flush()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Event {
        Count(String, i64, Vec<String>),
        Histogram(String, f64, Vec<String>),
    }

    impl Event {
        pub(crate) fn name(&self) -> &str {
            match self {
                Event::Count(name, ..) | Event::Histogram(name, ..) => name,
            }
        }

        pub(crate) fn tags(&self) -> &[String] {
            match self {
                Event::Count(_, _, tags) | Event::Histogram(_, _, tags) => tags,
            }
        }
    }

    /// Keeps every event in memory, optionally failing each call after recording it.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) events: Mutex<Vec<Event>>,
        pub(crate) fail: bool,
    }

    impl RecordingSink {
        pub(crate) fn failing() -> Self {
            Self {
                events: Mutex::default(),
                fail: true,
            }
        }

        pub(crate) fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        pub(crate) fn named(&self, name: &str) -> Vec<Event> {
            self.events()
                .into_iter()
                .filter(|e| e.name() == name)
                .collect()
        }

        fn record(&self, event: Event) -> Result<(), MetricsError> {
            self.events.lock().unwrap().push(event);
            if self.fail {
                return Err(MetricsError::Io(std::io::Error::other("collector down")));
            }
            Ok(())
        }
    }

    fn rendered(tags: &[Tag]) -> Vec<String> {
        tags.iter().map(ToString::to_string).collect()
    }

    impl MetricsSink for RecordingSink {
        fn count(&self, name: &str, value: i64, tags: &[Tag], _rate: f64) -> Result<(), MetricsError> {
            self.record(Event::Count(name.to_string(), value, rendered(tags)))
        }

        fn histogram(
            &self,
            name: &str,
            value: f64,
            tags: &[Tag],
            _rate: f64,
        ) -> Result<(), MetricsError> {
            self.record(Event::Histogram(name.to_string(), value, rendered(tags)))
        }
    }
}
