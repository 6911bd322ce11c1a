// =============================================================================
// Bounded response cache — LRU eviction (spec §4.3), mirrors CandleBuffer's
// ring-trim pattern (`market_data/candle_buffer.rs`) applied to REST bodies.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde_json::Value;

struct Entry {
    value: Value,
    inserted_at: Instant,
}

/// Small bounded cache for idempotent `GET` responses (bootstrap calls like
/// `exchangeInfo` that do not need to be re-fetched every reconnect). Holds
/// at most `capacity` entries; the oldest is evicted once that is exceeded.
pub struct ResponseCache {
    capacity: usize,
    ttl: Duration,
    order: RwLock<VecDeque<String>>,
    entries: RwLock<HashMap<String, Entry>>,
}

impl ResponseCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            order: RwLock::new(VecDeque::new()),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            return None;
        }
        let value = entry.value.clone();
        drop(entries);
        self.touch(key);
        Some(value)
    }

    pub fn put(&self, key: String, value: Value) {
        let mut entries = self.entries.write();
        let mut order = self.order.write();

        if !entries.contains_key(&key) {
            order.push_back(key.clone());
        } else {
            Self::move_to_back(&mut order, &key);
        }
        entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );

        while entries.len() > self.capacity {
            if let Some(oldest) = order.pop_front() {
                entries.remove(&oldest);
            } else {
                break;
            }
        }
    }

    /// Moves `key` to the back of the recency queue, marking it
    /// most-recently-used without touching its stored value or TTL clock.
    fn touch(&self, key: &str) {
        let mut order = self.order.write();
        Self::move_to_back(&mut order, key);
    }

    fn move_to_back(order: &mut VecDeque<String>, key: &str) {
        if let Some(pos) = order.iter().position(|k| k == key) {
            if let Some(k) = order.remove(pos) {
                order.push_back(k);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caches_and_returns_value() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        cache.put("a".into(), serde_json::json!({"x": 1}));
        assert_eq!(cache.get("a"), Some(serde_json::json!({"x": 1})));
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        cache.put("a".into(), serde_json::json!(1));
        cache.put("b".into(), serde_json::json!(2));
        cache.put("c".into(), serde_json::json!(3));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("c"), Some(serde_json::json!(3)));
    }

    #[test]
    fn expired_entries_return_none() {
        let cache = ResponseCache::new(2, Duration::from_millis(1));
        cache.put("a".into(), serde_json::json!(1));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn accessing_a_key_protects_it_from_eviction() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        cache.put("a".into(), serde_json::json!(1));
        cache.put("b".into(), serde_json::json!(2));
        // Touch "a" so it becomes the most-recently-used entry; "b" is now
        // the least-recently-used and should be evicted instead.
        assert_eq!(cache.get("a"), Some(serde_json::json!(1)));
        cache.put("c".into(), serde_json::json!(3));

        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(serde_json::json!(1)));
        assert_eq!(cache.get("c"), Some(serde_json::json!(3)));
    }

    #[test]
    fn reinserting_a_key_refreshes_its_recency() {
        let cache = ResponseCache::new(2, Duration::from_secs(60));
        cache.put("a".into(), serde_json::json!(1));
        cache.put("b".into(), serde_json::json!(2));
        cache.put("a".into(), serde_json::json!(10));
        cache.put("c".into(), serde_json::json!(3));

        // "b" was never touched again after insertion, so it is the
        // genuinely least-recently-used entry and gets evicted.
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(serde_json::json!(10)));
        assert_eq!(cache.get("c"), Some(serde_json::json!(3)));
    }
}
