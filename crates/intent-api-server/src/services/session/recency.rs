use std::collections::{BTreeMap, HashMap};

/// Bounded least-recently-used index.
///
/// Every `get` hit and every `put` stamps the entry with a fresh tick; the
/// entry with the smallest tick is evicted once `capacity` is exceeded.
pub(crate) struct RecencyCache<V> {
    capacity: usize,
    tick: u64,
    entries: HashMap<String, (V, u64)>,
    order: BTreeMap<u64, String>,
}

impl<V: Clone> RecencyCache<V> {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            tick: 0,
            entries: HashMap::with_capacity(capacity),
            order: BTreeMap::new(),
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Look up and mark as most recently used.
    pub(crate) fn get(&mut self, key: &str) -> Option<V> {
        let tick = self.next_tick();
        let (value, stamp) = self.entries.get_mut(key)?;
        self.order.remove(&*stamp);
        *stamp = tick;
        self.order.insert(tick, key.to_string());
        Some(value.clone())
    }

    /// Insert or refresh. Returns the key evicted to make room, if any.
    pub(crate) fn put(&mut self, key: &str, value: V) -> Option<String> {
        let tick = self.next_tick();
        if let Some((old, stamp)) = self.entries.get_mut(key) {
            *old = value;
            self.order.remove(&*stamp);
            *stamp = tick;
            self.order.insert(tick, key.to_string());
            return None;
        }

        self.entries.insert(key.to_string(), (value, tick));
        self.order.insert(tick, key.to_string());

        if self.entries.len() > self.capacity {
            let (_, oldest) = self.order.pop_first()?;
            self.entries.remove(&oldest);
            return Some(oldest);
        }
        None
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = RecencyCache::new(2);
        assert_eq!(cache.put("a", 1), None);
        assert_eq!(cache.put("b", 2), None);
        assert_eq!(cache.put("c", 3), Some("a".to_string()));

        assert!(!cache.contains("a"));
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_get_refreshes_recency() {
        let mut cache = RecencyCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.get("a"), Some(1));

        assert_eq!(cache.put("c", 3), Some("b".to_string()));
        assert!(cache.contains("a"));
        assert!(cache.contains("c"));
    }

    #[test]
    fn test_put_existing_key_replaces_without_eviction() {
        let mut cache = RecencyCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.put("a", 10), None);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(10));

        assert_eq!(cache.put("c", 3), Some("b".to_string()));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut cache = RecencyCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.put("a", 1);
        assert_eq!(cache.put("b", 2), Some("a".to_string()));
    }

    #[test]
    fn test_miss_returns_none() {
        let mut cache: RecencyCache<u8> = RecencyCache::new(4);
        assert_eq!(cache.get("nope"), None);
    }
}
