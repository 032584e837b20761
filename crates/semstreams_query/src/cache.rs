//! Query result cache.
//!
//! A TTL-bounded cache keyed by a canonical hash of the structured request,
//! holding pre-encoded reply bytes. Applied to path and semantic queries;
//! entity gets are already single KV reads and bypass it. When full, the
//! oldest entry is evicted.

use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

/// Cache tuning knobs.
#[derive(Debug, Clone)]
pub struct QueryCacheSettings {
    /// Master switch; a disabled cache stores and returns nothing.
    pub enabled: bool,
    /// How long a cached reply stays valid.
    pub ttl: Duration,
    /// Maximum cached replies.
    pub max_entries: usize,
}

impl Default for QueryCacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(30),
            max_entries: 1_024,
        }
    }
}

/// The TTL-bounded reply cache.
pub struct QueryCache {
    settings: QueryCacheSettings,
    entries: DashMap<u64, (Instant, Vec<u8>)>,
}

impl QueryCache {
    /// An empty cache.
    #[must_use]
    pub fn new(settings: QueryCacheSettings) -> Self {
        Self {
            settings,
            entries: DashMap::new(),
        }
    }

    /// Canonical cache key for a request of a given kind.
    #[must_use]
    pub fn key_for<T: Serialize>(kind: &str, request: &T) -> u64 {
        let canonical = serde_json::to_string(request).unwrap_or_default();
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        kind.hash(&mut hasher);
        canonical.hash(&mut hasher);
        hasher.finish()
    }

    /// Fetch a live cached reply.
    #[must_use]
    pub fn get(&self, key: u64) -> Option<Vec<u8>> {
        if !self.settings.enabled {
            return None;
        }
        let expired = match self.entries.get(&key) {
            Some(entry) if entry.0.elapsed() < self.settings.ttl => {
                return Some(entry.1.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(&key);
        }
        None
    }

    /// Store a reply, evicting the oldest entry when full.
    pub fn put(&self, key: u64, reply: Vec<u8>) {
        if !self.settings.enabled {
            return;
        }
        if self.entries.len() >= self.settings.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.value().0)
                .map(|e| *e.key());
            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(key, (Instant::now(), reply));
    }

    /// Live entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_and_key_stability() {
        let cache = QueryCache::new(QueryCacheSettings::default());
        let key = QueryCache::key_for("path", &serde_json::json!({"start": "a"}));
        assert_eq!(key, QueryCache::key_for("path", &serde_json::json!({"start": "a"})));
        assert_ne!(key, QueryCache::key_for("semantic", &serde_json::json!({"start": "a"})));

        assert!(cache.get(key).is_none());
        cache.put(key, b"reply".to_vec());
        assert_eq!(cache.get(key).unwrap(), b"reply");
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = QueryCache::new(QueryCacheSettings {
            ttl: Duration::from_millis(0),
            ..QueryCacheSettings::default()
        });
        cache.put(1, b"x".to_vec());
        assert!(cache.get(1).is_none());
    }

    #[test]
    fn test_max_entries_evicts_oldest() {
        let cache = QueryCache::new(QueryCacheSettings {
            max_entries: 2,
            ..QueryCacheSettings::default()
        });
        cache.put(1, b"a".to_vec());
        cache.put(2, b"b".to_vec());
        cache.put(3, b"c".to_vec());
        assert_eq!(cache.len(), 2);
        assert!(cache.get(3).is_some());
    }

    #[test]
    fn test_disabled_cache_is_inert() {
        let cache = QueryCache::new(QueryCacheSettings {
            enabled: false,
            ..QueryCacheSettings::default()
        });
        cache.put(1, b"a".to_vec());
        assert!(cache.get(1).is_none());
        assert!(cache.is_empty());
    }
}
