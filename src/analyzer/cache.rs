//! Caching for query analysis results.
//!
//! Features are cached by the SHA-256 of the trimmed query text with a TTL,
//! so repeated queries skip embedding and classification entirely.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use crate::models::QueryFeatures;

/// Hex-encoded SHA-256 of cached content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash the trimmed text.
    pub fn from_text(text: &str) -> Self {
        let digest = Sha256::digest(text.trim().as_bytes());
        Self(hex::encode(digest))
    }

    /// Hex string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    features: QueryFeatures,
    created_at: Instant,
    last_accessed: Instant,
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Total cache hits.
    pub hits: u64,
    /// Total cache misses.
    pub misses: u64,
    /// Entries inserted.
    pub entries_added: u64,
    /// Entries evicted (expired or LRU).
    pub entries_evicted: u64,
}

impl CacheStats {
    /// Hit rate in [0, 1]; 0.0 when the cache was never queried.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// TTL + LRU cache from query text to extracted features.
///
/// Thread-safe via interior `RwLock`s; reads only take the write lock when
/// they find an expired entry.
pub struct AnalysisCache {
    entries: RwLock<HashMap<ContentHash, CacheEntry>>,
    max_entries: usize,
    ttl: Duration,
    stats: RwLock<CacheStats>,
}

impl AnalysisCache {
    /// Create a cache holding up to `max_entries` with the given TTL.
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries,
            ttl,
            stats: RwLock::new(CacheStats::default()),
        }
    }

    /// Look up features for the given text.
    pub fn get(&self, text: &str) -> Option<QueryFeatures> {
        enum Lookup {
            Hit(QueryFeatures),
            Expired,
            Miss,
        }

        let hash = ContentHash::from_text(text);
        let now = Instant::now();

        let lookup = {
            let entries = self.entries.read().expect("cache lock poisoned");
            match entries.get(&hash) {
                Some(entry) if now.duration_since(entry.created_at) <= self.ttl => {
                    Lookup::Hit(entry.features.clone())
                }
                Some(_) => Lookup::Expired,
                None => Lookup::Miss,
            }
        };

        match lookup {
            Lookup::Hit(features) => {
                self.stats.write().expect("stats lock poisoned").hits += 1;
                let mut entries = self.entries.write().expect("cache lock poisoned");
                if let Some(entry) = entries.get_mut(&hash) {
                    entry.last_accessed = now;
                }
                Some(features)
            }
            Lookup::Expired => {
                self.entries
                    .write()
                    .expect("cache lock poisoned")
                    .remove(&hash);
                let mut stats = self.stats.write().expect("stats lock poisoned");
                stats.entries_evicted += 1;
                stats.misses += 1;
                None
            }
            Lookup::Miss => {
                self.stats.write().expect("stats lock poisoned").misses += 1;
                None
            }
        }
    }

    /// Insert features for the given text, evicting the least recently used
    /// entry when full.
    pub fn insert(&self, text: &str, features: QueryFeatures) {
        let hash = ContentHash::from_text(text);
        let now = Instant::now();
        let mut entries = self.entries.write().expect("cache lock poisoned");

        if entries.len() >= self.max_entries && !entries.contains_key(&hash) {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
                self.stats
                    .write()
                    .expect("stats lock poisoned")
                    .entries_evicted += 1;
            }
        }

        entries.insert(
            hash,
            CacheEntry {
                features,
                created_at: now,
                last_accessed: now,
            },
        );
        self.stats
            .write()
            .expect("stats lock poisoned")
            .entries_added += 1;
    }

    /// Current number of entries.
    pub fn len(&self) -> usize {
        self.entries.read().expect("cache lock poisoned").len()
    }

    /// True when the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.read().expect("stats lock poisoned").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_features() -> QueryFeatures {
        QueryFeatures {
            embedding: vec![0.5; 4],
            token_count: 10,
            complexity_score: 0.3,
            domain: "general".to_string(),
            domain_confidence: 0.7,
        }
    }

    #[test]
    fn test_hit_after_insert() {
        let cache = AnalysisCache::new(10, Duration::from_secs(60));
        assert!(cache.get("What is 2+2?").is_none());

        cache.insert("What is 2+2?", sample_features());
        let hit = cache.get("What is 2+2?").expect("should hit");
        assert_eq!(hit.token_count, 10);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_keyed_by_trimmed_text() {
        let cache = AnalysisCache::new(10, Duration::from_secs(60));
        cache.insert("  hello  ", sample_features());
        assert!(cache.get("hello").is_some());
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = AnalysisCache::new(10, Duration::from_millis(0));
        cache.insert("hello", sample_features());
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("hello").is_none());
        assert_eq!(cache.stats().entries_evicted, 1);
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let cache = AnalysisCache::new(2, Duration::from_secs(60));
        cache.insert("a", sample_features());
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("b", sample_features());
        std::thread::sleep(Duration::from_millis(2));
        // Touch "a" so "b" becomes the LRU victim.
        cache.get("a");
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("c", sample_features());

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_content_hash_stable() {
        assert_eq!(
            ContentHash::from_text("hello").as_str(),
            ContentHash::from_text("  hello  ").as_str()
        );
        assert_eq!(ContentHash::from_text("x").as_str().len(), 64);
    }
}
