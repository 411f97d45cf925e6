use moka::sync::Cache;
use std::time::{Duration, Instant};

pub const DEFAULT_TTL: Duration = Duration::from_secs(1);

/// Remembers when each in-flight query was seen, keyed by transaction ID.
///
/// Entries live for a fixed TTL after their last `put`. Moka reclaims them in
/// the background; `get` also compares against the caller's clock so an entry
/// is never handed out once its TTL has passed, whatever moka's housekeeping
/// schedule.
pub struct CorrelationCache {
    entries: Cache<String, Instant>,
    ttl: Duration,
}

impl CorrelationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Cache::builder().time_to_live(ttl).build(),
            ttl,
        }
    }

    /// Record a query seen at `at`. A later query with the same ID replaces it.
    pub fn put(&self, id: u16, at: Instant) {
        self.entries.insert(id.to_string(), at);
    }

    /// The instant the query for `id` was seen, unless missing or expired at `now`.
    pub fn get(&self, id: u16, now: Instant) -> Option<Instant> {
        let seen = self.entries.get(&id.to_string())?;
        if now.saturating_duration_since(seen) >= self.ttl {
            return None;
        }
        Some(seen)
    }
}

impl Default for CorrelationCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_on_unknown_id() {
        let cache = CorrelationCache::default();
        assert_eq!(cache.get(7, Instant::now()), None);
    }

    #[test]
    fn hit_within_ttl() {
        let cache = CorrelationCache::new(Duration::from_secs(5));
        let t = Instant::now();
        cache.put(42, t);
        assert_eq!(cache.get(42, t + Duration::from_millis(30)), Some(t));
        // lookups don't consume the entry
        assert_eq!(cache.get(42, t + Duration::from_millis(40)), Some(t));
    }

    #[test]
    fn last_put_wins() {
        let cache = CorrelationCache::new(Duration::from_secs(5));
        let first = Instant::now();
        let second = first + Duration::from_millis(200);
        cache.put(5, first);
        cache.put(5, second);
        assert_eq!(cache.get(5, second + Duration::from_millis(10)), Some(second));
    }

    #[test]
    fn expired_by_caller_clock() {
        let cache = CorrelationCache::new(Duration::from_secs(5));
        let t = Instant::now();
        cache.put(9, t);
        assert_eq!(cache.get(9, t + Duration::from_secs(5)), None);
        assert_eq!(cache.get(9, t + Duration::from_secs(6)), None);
    }

    #[test]
    fn expired_by_wall_clock() {
        let cache = CorrelationCache::new(Duration::from_millis(50));
        let t = Instant::now();
        cache.put(9, t);
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(cache.get(9, t), None);
    }

    #[test]
    fn ids_are_independent() {
        let cache = CorrelationCache::new(Duration::from_secs(5));
        let t = Instant::now();
        cache.put(1, t);
        cache.put(2, t + Duration::from_millis(1));
        assert_eq!(cache.get(1, t), Some(t));
        assert_eq!(cache.get(3, t), None);
    }
}
