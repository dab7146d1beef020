//! In-memory store for resolved inputs and generated documents
//!
//! Generated PDFs land here under fresh UUID keys so follow-up tool calls
//! can chain on a `cache_key` instead of shipping bytes back and forth.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

struct State {
    entries: LruCache<String, Vec<u8>>,
    bytes_used: usize,
}

impl State {
    fn credit_removal(&mut self, removed: usize) {
        self.bytes_used = self.bytes_used.saturating_sub(removed);
    }

    /// Evict least-recently-used entries until `incoming` bytes fit the budget
    fn make_room(&mut self, incoming: usize, budget: usize) {
        while self.bytes_used + incoming > budget {
            match self.entries.pop_lru() {
                Some((_, dropped)) => {
                    let n = dropped.len();
                    self.credit_removal(n);
                }
                None => break,
            }
        }
    }
}

/// LRU document store bounded by entry count and total bytes
pub struct DocumentCache {
    state: Mutex<State>,
    byte_budget: usize,
}

impl DocumentCache {
    pub fn new(max_entries: usize, byte_budget: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(State {
                entries: LruCache::new(capacity),
                bytes_used: 0,
            }),
            byte_budget,
        }
    }

    /// Store a document under `key` and report whether it was kept.
    ///
    /// A document larger than the whole byte budget is refused outright;
    /// anything smaller displaces least-recently-used entries as needed.
    pub fn put(&self, key: String, data: Vec<u8>) -> bool {
        let incoming = data.len();
        if incoming > self.byte_budget {
            return false;
        }

        let mut state = self.state.lock();

        // Replacing an entry returns its bytes to the budget first
        if let Some(replaced) = state.entries.pop(&key) {
            let n = replaced.len();
            state.credit_removal(n);
        }

        state.make_room(incoming, self.byte_budget);
        state.bytes_used += incoming;
        state.entries.put(key, data);
        true
    }

    /// Fetch a copy of the document stored under `key`, refreshing its
    /// recency
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.state.lock().entries.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().entries.contains(key)
    }

    pub fn remove(&self, key: &str) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        let dropped = state.entries.pop(key)?;
        let n = dropped.len();
        state.credit_removal(n);
        Some(dropped)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.state.lock().bytes_used
    }

    /// Mint a key no current entry uses
    pub fn generate_unique_key(&self) -> String {
        let state = self.state.lock();
        loop {
            let candidate = uuid::Uuid::new_v4().to_string();
            if !state.entries.contains(&candidate) {
                return candidate;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_fetch() {
        let cache = DocumentCache::new(8, 1024);
        assert!(cache.is_empty());

        assert!(cache.put("report-a".to_string(), b"%PDF-a".to_vec()));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_bytes(), 6);
        assert_eq!(cache.get("report-a").as_deref(), Some(b"%PDF-a".as_slice()));

        assert!(cache.contains("report-a"));
        assert!(!cache.contains("report-b"));
    }

    #[test]
    fn test_entry_count_eviction() {
        let cache = DocumentCache::new(2, 1024);

        cache.put("a".to_string(), vec![1]);
        cache.put("b".to_string(), vec![2]);
        cache.put("c".to_string(), vec![3]);

        // "a" was least recently used
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
    }

    #[test]
    fn test_remove_returns_bytes_to_budget() {
        let cache = DocumentCache::new(8, 1024);

        cache.put("a".to_string(), vec![0u8; 40]);
        assert_eq!(cache.total_bytes(), 40);

        assert_eq!(cache.remove("a"), Some(vec![0u8; 40]));
        assert!(!cache.contains("a"));
        assert_eq!(cache.total_bytes(), 0);
        assert_eq!(cache.remove("a"), None);
    }

    #[test]
    fn test_byte_budget_eviction() {
        // Budget of 100 bytes across up to 8 entries
        let cache = DocumentCache::new(8, 100);

        cache.put("a".to_string(), vec![0u8; 30]);
        cache.put("b".to_string(), vec![0u8; 30]);
        cache.put("c".to_string(), vec![0u8; 30]);
        assert_eq!(cache.total_bytes(), 90);

        // A fourth 30-byte entry displaces the oldest one
        cache.put("d".to_string(), vec![0u8; 30]);
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
        assert!(cache.contains("d"));
        assert_eq!(cache.total_bytes(), 90);
    }

    #[test]
    fn test_oversized_document_refused() {
        let cache = DocumentCache::new(8, 50);

        assert!(!cache.put("huge".to_string(), vec![0u8; 51]));
        assert!(cache.is_empty());
        assert_eq!(cache.total_bytes(), 0);
    }

    #[test]
    fn test_replacement_adjusts_byte_count() {
        let cache = DocumentCache::new(8, 1024);

        cache.put("a".to_string(), vec![0u8; 50]);
        cache.put("a".to_string(), vec![0u8; 30]);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_bytes(), 30);
    }

    #[test]
    fn test_unique_keys_are_uuids() {
        let cache = DocumentCache::new(8, 1024);
        let first = cache.generate_unique_key();
        let second = cache.generate_unique_key();

        assert_ne!(first, second);
        assert_eq!(first.len(), 36);
    }
}
