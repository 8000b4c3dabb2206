//! MemoryCache: byte-budgeted LRU cache for opaque blobs

use std::fmt;
use std::sync::Arc;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::dump::{AllocatorDump, ProcessMemoryDump};
use crate::entry::Entry;
use crate::lru::LruMap;
use crate::pressure::{MemoryPressureLevel, PressurePolicy, TieredPolicy};
use crate::stats::CacheStats;

/// State guarded by the cache mutex
struct Inner {
    entries: LruMap<Arc<[u8]>, Entry>,
    current_size: usize,
}

impl Inner {
    /// Drop the least recently used entry; `false` if there was none
    fn evict_lru(&mut self) -> bool {
        match self.entries.pop_front() {
            Some((_, entry)) => {
                self.current_size -= entry.total_size();
                true
            }
            None => false,
        }
    }

    fn evict_key(&mut self, key: &[u8]) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.current_size -= entry.total_size();
                true
            }
            None => false,
        }
    }
}

/// Thread-safe key/value blob cache with a hard byte budget.
///
/// Every entry is charged `key.len() + value.len()` bytes and the total never
/// exceeds `max_size`. When a store needs room, the least recently used
/// entries are evicted first; loads (including size-only peeks) count as use.
/// All operations take one mutex for their whole duration.
pub struct MemoryCache {
    /// Hard ceiling, fixed at construction
    max_size: usize,

    /// Trace label for copy-mode hits; empty disables the event
    hit_trace_label: String,

    /// Maps a pressure level to a shrink target
    policy: Arc<dyn PressurePolicy>,

    inner: Mutex<Inner>,

    stats: CacheStats,
}

impl MemoryCache {
    /// Create a cache with the default [`TieredPolicy`]
    ///
    /// # Arguments
    /// * `max_size` - Byte budget; `0` gives a cache that stores nothing
    /// * `hit_trace_label` - Trace event label for cache hits, may be empty
    pub fn new(max_size: usize, hit_trace_label: &str) -> Self {
        Self::with_policy(max_size, hit_trace_label, TieredPolicy::default())
    }

    /// Create a cache with an injected pressure policy
    pub fn with_policy<P>(max_size: usize, hit_trace_label: &str, policy: P) -> Self
    where
        P: PressurePolicy + 'static,
    {
        Self {
            max_size,
            hit_trace_label: hit_trace_label.to_string(),
            policy: Arc::new(policy),
            inner: Mutex::new(Inner {
                entries: LruMap::new(),
                current_size: 0,
            }),
            stats: CacheStats::new(),
        }
    }

    /// Look up `key`, either peeking at its size or copying it out.
    ///
    /// With `out == None` this returns the stored size without copying.
    /// With `Some(buf)` it copies the value into `buf` and returns its length.
    /// Either way a hit makes the entry most recently used. A miss returns 0.
    ///
    /// # Panics
    /// If `buf.len()` differs from the stored size.
    pub fn load(&self, key: &[u8], out: Option<&mut [u8]>) -> usize {
        let mut inner = self.inner.lock();

        let Some(entry) = inner.entries.get_refresh(key) else {
            self.stats.record_miss();
            return 0;
        };

        if out.is_some() && !self.hit_trace_label.is_empty() {
            trace!(target: "gpu", label = %self.hit_trace_label, "cache hit");
        }
        self.stats.record_hit();

        entry.read_data(out)
    }

    /// Look up `key` and return a copy of its value.
    ///
    /// Equivalent to a peek followed by a copy, but under a single lock so
    /// a concurrent replacement cannot change the size in between.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock();

        match inner.entries.get_refresh(key) {
            Some(entry) => {
                self.stats.record_hit();
                Some(entry.data().to_vec())
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    /// Store a copy of `value` under `key`, replacing any previous value.
    ///
    /// An empty value is ignored. An entry that would take the whole budget
    /// by itself is dropped silently, after the old value for `key` has
    /// been evicted.
    pub fn store(&self, key: &[u8], value: &[u8]) {
        if value.is_empty() {
            return;
        }

        let mut inner = self.inner.lock();

        // Duplicates never coexist, and the budget check starts clean.
        inner.evict_key(key);

        let entry_size = key.len() + value.len();
        if entry_size >= self.max_size {
            self.stats.record_rejection();
            debug!(
                entry_size,
                max_size = self.max_size,
                "blob too large for cache, dropped"
            );
            return;
        }

        let mut evicted = 0u64;
        while inner.current_size + entry_size > self.max_size {
            if !inner.evict_lru() {
                break;
            }
            evicted += 1;
        }
        self.stats.record_evictions(evicted);

        let key: Arc<[u8]> = Arc::from(key);
        let entry = Entry::new(Arc::clone(&key), value);
        debug_assert_eq!(entry.total_size(), entry_size);

        inner.current_size += entry_size;
        let inserted = inner.entries.push_back(key, entry);
        debug_assert!(inserted);
        self.stats.record_insert();
    }

    /// Evict least recently used entries until the cache fits the target the
    /// policy computes for `level`. `max_size` itself is left untouched.
    pub fn shrink_on_memory_pressure(&self, level: MemoryPressureLevel) {
        let mut inner = self.inner.lock();

        let new_limit = self.policy.target_size(self.max_size, level).min(self.max_size);
        let before = inner.current_size;

        let mut evicted = 0u64;
        while inner.current_size > new_limit {
            if !inner.evict_lru() {
                break;
            }
            evicted += 1;
        }
        self.stats.record_evictions(evicted);

        if evicted > 0 {
            debug!(
                %level,
                new_limit,
                evicted,
                freed = before - inner.current_size,
                "shrank cache on memory pressure"
            );
        }
    }

    /// Snapshot of the bytes and entries held. Does not affect LRU order.
    pub fn report_diagnostics(&self, dump_name: &str) -> AllocatorDump {
        let inner = self.inner.lock();
        AllocatorDump {
            name: dump_name.to_string(),
            size_bytes: inner.current_size,
            object_count: inner.entries.len(),
        }
    }

    /// Write [`report_diagnostics`](Self::report_diagnostics) into `pmd`
    pub fn on_memory_dump(&self, dump_name: &str, pmd: &mut ProcessMemoryDump) {
        pmd.add(self.report_diagnostics(dump_name));
    }

    /// Check for `key` without counting it as a use
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.inner.lock().entries.peek(key).is_some()
    }

    /// Byte budget set at construction
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Bytes currently charged against the budget
    pub fn current_size(&self) -> usize {
        self.inner.lock().current_size
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Check if the cache holds nothing
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Trace label for cache hits
    pub fn hit_trace_label(&self) -> &str {
        &self.hit_trace_label
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    #[cfg(test)]
    fn keys_lru_order(&self) -> Vec<Vec<u8>> {
        self.inner
            .lock()
            .entries
            .keys_lru_order()
            .into_iter()
            .map(|key| key.to_vec())
            .collect()
    }

    #[cfg(test)]
    fn summed_entry_size(&self) -> usize {
        let inner = self.inner.lock();
        inner
            .entries
            .keys_lru_order()
            .iter()
            .filter_map(|key| inner.entries.peek(&key[..]))
            .map(Entry::total_size)
            .sum()
    }
}

impl fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MemoryCache")
            .field("max_size", &self.max_size)
            .field("current_size", &inner.current_size)
            .field("entries", &inner.entries.len())
            .field("hit_trace_label", &self.hit_trace_label)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn peek(cache: &MemoryCache, key: &[u8]) -> usize {
        cache.load(key, None)
    }

    fn copy(cache: &MemoryCache, key: &[u8]) -> Vec<u8> {
        let size = cache.load(key, None);
        let mut buf = vec![0u8; size];
        assert_eq!(cache.load(key, Some(&mut buf)), size);
        buf
    }

    #[test]
    fn test_cache_basic() {
        let cache = MemoryCache::new(100, "");

        cache.store(b"a", b"1234");

        assert_eq!(peek(&cache, b"a"), 4);
        assert_eq!(copy(&cache, b"a"), b"1234");
        assert_eq!(cache.current_size(), 5);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().inserts(), 1);
    }

    #[test]
    fn test_cache_miss() {
        let cache = MemoryCache::new(100, "");

        assert_eq!(cache.load(b"missing", None), 0);
        let mut buf = [0u8; 4];
        assert_eq!(cache.load(b"missing", Some(&mut buf)), 0);
        assert_eq!(cache.get(b"missing"), None);
        assert_eq!(cache.stats().misses(), 3);
        assert_eq!(cache.stats().hits(), 0);
    }

    #[test]
    fn test_cache_eviction_makes_room() {
        let cache = MemoryCache::new(100, "");

        cache.store(b"a", b"1234");
        assert_eq!(peek(&cache, b"a"), 4);

        // 1 + 96 = 97, plus the 5 already held is over budget
        cache.store(b"b", &[7u8; 96]);

        assert!(!cache.contains_key(b"a"));
        assert!(cache.contains_key(b"b"));
        assert_eq!(cache.current_size(), 97);
        assert_eq!(cache.stats().evictions(), 1);
    }

    #[test]
    fn test_cache_oversized_rejected() {
        let cache = MemoryCache::new(10, "");

        cache.store(b"key", b"0123456789");

        assert!(cache.is_empty());
        assert_eq!(cache.current_size(), 0);
        assert_eq!(cache.stats().rejections(), 1);
    }

    #[test]
    fn test_cache_exact_budget_rejected() {
        let cache = MemoryCache::new(10, "");

        // key + value == max_size is still too large
        cache.store(b"k", b"123456789");
        assert!(cache.is_empty());

        cache.store(b"k", b"12345678");
        assert_eq!(cache.current_size(), 9);
    }

    #[test]
    fn test_cache_oversized_keeps_other_entries() {
        let cache = MemoryCache::new(20, "");

        cache.store(b"a", b"aaaa");
        cache.store(b"b", b"bbbb");
        cache.store(b"c", &[0u8; 30]);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.current_size(), 10);
        assert_eq!(cache.stats().evictions(), 0);
    }

    #[test]
    fn test_cache_oversized_replacement_drops_old_value() {
        let cache = MemoryCache::new(20, "");

        cache.store(b"a", b"small");
        cache.store(b"a", &[0u8; 30]);

        assert!(!cache.contains_key(b"a"));
        assert_eq!(cache.current_size(), 0);
    }

    #[test]
    fn test_cache_zero_budget_stores_nothing() {
        let cache = MemoryCache::new(0, "");

        cache.store(b"k", b"v");

        assert!(cache.is_empty());
        assert_eq!(cache.max_size(), 0);
    }

    #[test]
    fn test_cache_empty_value_ignored() {
        let cache = MemoryCache::new(100, "");

        cache.store(b"k", b"v");
        cache.store(b"k", b"");

        // The no-op store does not evict the existing value
        assert_eq!(copy(&cache, b"k"), b"v");
        assert_eq!(cache.stats().inserts(), 1);
    }

    #[test]
    fn test_cache_lru_order_respects_loads() {
        let cache = MemoryCache::new(10, "");

        cache.store(b"x", b"aa");
        cache.store(b"y", b"bb");
        assert_eq!(peek(&cache, b"x"), 2);

        // 6 + 6 > 10, evicting y alone leaves 3 + 6 = 9
        cache.store(b"z", b"zzzzz");

        assert!(cache.contains_key(b"x"));
        assert!(!cache.contains_key(b"y"));
        assert!(cache.contains_key(b"z"));
        assert_eq!(cache.keys_lru_order(), vec![b"x".to_vec(), b"z".to_vec()]);
    }

    #[test]
    fn test_cache_lru_evicts_in_recency_order() {
        let cache = MemoryCache::new(12, "");

        cache.store(b"a", b"11");
        cache.store(b"b", b"22");
        cache.store(b"c", b"33");
        cache.get(b"a");
        cache.store(b"b", b"44");

        assert_eq!(
            cache.keys_lru_order(),
            vec![b"c".to_vec(), b"a".to_vec(), b"b".to_vec()]
        );

        // 9 + 8 > 12 twice over: c then a go, b stays
        cache.store(b"d", b"5555555");
        assert_eq!(cache.keys_lru_order(), vec![b"b".to_vec(), b"d".to_vec()]);
    }

    #[test]
    fn test_cache_overwrite() {
        let cache = MemoryCache::new(100, "");

        cache.store(b"k", b"v");
        cache.store(b"k", b"w");

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.current_size(), 2);
        let mut buf = [0u8; 1];
        assert_eq!(cache.load(b"k", Some(&mut buf)), 1);
        assert_eq!(&buf, b"w");
    }

    #[test]
    fn test_cache_overwrite_with_different_size() {
        let cache = MemoryCache::new(100, "");

        cache.store(b"k", b"short");
        cache.store(b"k", b"a much longer value");

        assert_eq!(peek(&cache, b"k"), 19);
        assert_eq!(cache.current_size(), 20);
    }

    #[test]
    fn test_cache_peek_is_idempotent() {
        let cache = MemoryCache::new(100, "");

        cache.store(b"a", b"abc");
        cache.store(b"b", b"def");

        for _ in 0..5 {
            assert_eq!(peek(&cache, b"a"), 3);
        }

        assert_eq!(copy(&cache, b"a"), b"abc");
        // Peeks promoted a past b
        assert_eq!(cache.keys_lru_order(), vec![b"b".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn test_cache_value_is_a_copy() {
        let cache = MemoryCache::new(100, "");
        let mut value = b"original".to_vec();

        cache.store(b"k", &value);
        value.copy_from_slice(b"mutated!");

        assert_eq!(cache.get(b"k"), Some(b"original".to_vec()));
    }

    #[test]
    #[should_panic(expected = "exactly the stored size")]
    fn test_cache_copy_with_wrong_size_panics() {
        let cache = MemoryCache::new(100, "");

        cache.store(b"k", b"value");
        let mut buf = [0u8; 3];
        cache.load(b"k", Some(&mut buf));
    }

    #[test]
    fn test_cache_hit_trace_label() {
        let cache = MemoryCache::new(100, "Cache::Hit");

        cache.store(b"k", b"value");
        assert_eq!(copy(&cache, b"k"), b"value");
        assert_eq!(cache.hit_trace_label(), "Cache::Hit");
        assert_eq!(cache.stats().hits(), 2);
    }

    #[test]
    fn test_cache_shrink_critical_empties() {
        let cache = MemoryCache::new(100, "");

        cache.store(b"a", b"1");
        cache.store(b"b", b"2");
        cache.store(b"c", b"3");
        cache.shrink_on_memory_pressure(MemoryPressureLevel::Critical);

        let dump = cache.report_diagnostics("test");
        assert_eq!(dump.object_count, 0);
        assert_eq!(dump.size_bytes, 0);
        assert_eq!(cache.stats().evictions(), 3);
    }

    #[test]
    fn test_cache_shrink_keeps_most_recent() {
        let cache = MemoryCache::new(100, "");

        // Four 20-byte entries
        for key in [b"a", b"b", b"c", b"d"] {
            cache.store(key, &[0u8; 19]);
        }
        cache.load(b"a", None);

        // Moderate keeps 25 bytes: room for exactly one entry
        cache.shrink_on_memory_pressure(MemoryPressureLevel::Moderate);

        assert!(cache.current_size() <= 25);
        assert_eq!(cache.keys_lru_order(), vec![b"a".to_vec()]);
    }

    #[test]
    fn test_cache_shrink_does_not_lower_budget() {
        let cache = MemoryCache::new(100, "");

        cache.store(b"a", &[0u8; 49]);
        cache.store(b"b", &[0u8; 49]);
        cache.shrink_on_memory_pressure(MemoryPressureLevel::Critical);
        assert!(cache.is_empty());

        cache.store(b"a", &[0u8; 49]);
        cache.store(b"b", &[0u8; 49]);
        assert_eq!(cache.current_size(), 100);
        assert_eq!(cache.max_size(), 100);
    }

    #[test]
    fn test_cache_shrink_is_idempotent() {
        let cache = MemoryCache::with_policy(100, "", |max: usize, _level: MemoryPressureLevel| max / 2);

        for key in [b"a", b"b", b"c", b"d"] {
            cache.store(key, &[0u8; 19]);
        }

        cache.shrink_on_memory_pressure(MemoryPressureLevel::Moderate);
        let after_first = cache.keys_lru_order();
        cache.shrink_on_memory_pressure(MemoryPressureLevel::Moderate);

        assert_eq!(cache.keys_lru_order(), after_first);
        assert_eq!(cache.current_size(), 40);
    }

    #[test]
    fn test_cache_shrink_clamps_policy() {
        let cache = MemoryCache::with_policy(10, "", |_: usize, _: MemoryPressureLevel| usize::MAX);

        cache.store(b"a", b"1234");
        cache.shrink_on_memory_pressure(MemoryPressureLevel::Critical);

        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_shrink_none_is_noop() {
        let cache = MemoryCache::new(100, "");

        cache.store(b"a", b"1234");
        cache.shrink_on_memory_pressure(MemoryPressureLevel::None);

        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_diagnostics_do_not_reorder() {
        let cache = MemoryCache::new(100, "");

        cache.store(b"a", b"1");
        cache.store(b"b", b"2");
        let before = cache.keys_lru_order();

        let dump = cache.report_diagnostics("gpu/test");
        assert_eq!(dump.name, "gpu/test");
        assert_eq!(dump.size_bytes, 4);
        assert_eq!(dump.object_count, 2);
        assert_eq!(cache.keys_lru_order(), before);

        let mut pmd = ProcessMemoryDump::new();
        cache.on_memory_dump("gpu/test", &mut pmd);
        assert_eq!(pmd.get("gpu/test"), Some(&dump));
    }

    #[test]
    fn test_cache_budget_invariant_under_churn() {
        let cache = MemoryCache::new(64, "");

        for i in 0..500u32 {
            let key = format!("key-{}", i % 37);
            let value = vec![i as u8; (i as usize * 7) % 40 + 1];
            cache.store(key.as_bytes(), &value);
            if i % 3 == 0 {
                cache.load(format!("key-{}", i % 11).as_bytes(), None);
            }
            if i % 50 == 0 {
                cache.shrink_on_memory_pressure(MemoryPressureLevel::Moderate);
            }

            assert!(cache.current_size() <= cache.max_size());
            assert_eq!(cache.summed_entry_size(), cache.current_size());
        }
    }

    #[test]
    fn test_cache_concurrent_access() {
        let cache = Arc::new(MemoryCache::new(4096, "Concurrent::Hit"));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..500usize {
                        let key = format!("shader-{}", (t * 31 + i) % 64);
                        // Value length depends only on the key, so peek-then-copy
                        // stays consistent even if another thread re-stores it.
                        let len = key.len() * 8;
                        if i % 2 == 0 {
                            cache.store(key.as_bytes(), &vec![t as u8; len]);
                        } else if let Some(value) = cache.get(key.as_bytes()) {
                            assert_eq!(value.len(), len);
                        }
                        if i % 97 == 0 {
                            cache.shrink_on_memory_pressure(MemoryPressureLevel::Moderate);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(cache.current_size() <= cache.max_size());
        assert_eq!(cache.summed_entry_size(), cache.current_size());
    }
}
