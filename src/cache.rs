use std::collections::{HashMap, VecDeque};

use sha2::{Digest, Sha256};

use crate::config::CacheSettings;

#[derive(Clone, Debug)]
struct CacheEntry<V> {
    value: V,
    stored_at: u64,
}

/// Bounded cache with per-entry TTL and least-recently-used eviction.
/// Expiry is lazy: entries are dropped when a read finds them stale.
/// `order` front = least recently used; it is always a permutation of the
/// key set.
#[derive(Debug)]
pub struct TtlLruCache<V> {
    settings: CacheSettings,
    entries: HashMap<String, CacheEntry<V>>,
    order: VecDeque<String>,
}

impl<V: Clone> TtlLruCache<V> {
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            settings,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// A hit moves the key to the back of the order list. The stored
    /// timestamp is not refreshed; an entry expires `expiration_ms` after it
    /// was written no matter how often it is read.
    pub fn get(&mut self, key: &str, now: u64) -> Option<V> {
        if !self.settings.enabled {
            return None;
        }
        let stored_at = self.entries.get(key)?.stored_at;
        if now.saturating_sub(stored_at) > self.settings.expiration_ms {
            self.entries.remove(key);
            self.order.retain(|candidate| candidate != key);
            return None;
        }
        self.order.retain(|candidate| candidate != key);
        self.order.push_back(key.to_string());
        Some(self.entries.get(key)?.value.clone())
    }

    pub fn insert(&mut self, key: String, value: V, now: u64) {
        if !self.settings.enabled || self.settings.max_entries == 0 {
            return;
        }

        use std::collections::hash_map::Entry;

        let entry = CacheEntry {
            value,
            stored_at: now,
        };

        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                occupied.insert(entry);
                self.order.retain(|candidate| candidate != &key);
                self.order.push_back(key);
                return;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }

        self.order.push_back(key);

        while self.entries.len() > self.settings.max_entries {
            let Some(candidate) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&candidate);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    fn order_is_permutation_of_keys(&self) -> bool {
        if self.order.len() != self.entries.len() {
            return false;
        }
        self.order.iter().all(|key| self.entries.contains_key(key))
    }
}

/// Composite lookup key for text translations. The same text requested under
/// a different mode or target language is a distinct entry.
pub fn text_key(text: &str, mode: &str, target_lang: &str) -> String {
    format!("{mode}:{target_lang}:{text}")
}

/// Content-addressed key for inline image/media payloads. Hashing the base64
/// content means renaming a file or re-uploading the same bytes still hits.
pub fn content_key(base64_data: &str) -> String {
    let digest = Sha256::digest(base64_data.as_bytes());
    hex_lower(&digest)
}

fn hex_lower(bytes: &[u8]) -> String {
    const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX_CHARS[(byte >> 4) as usize] as char);
        out.push(HEX_CHARS[(byte & 0x0f) as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(max_entries: usize, expiration_ms: u64) -> CacheSettings {
        CacheSettings {
            enabled: true,
            max_entries,
            expiration_ms,
        }
    }

    #[test]
    fn expires_entries_on_read() {
        let mut cache = TtlLruCache::new(settings(10, 100));
        cache.insert("k".to_string(), "v".to_string(), 1000);

        assert_eq!(cache.get("k", 1100).as_deref(), Some("v"));
        assert!(cache.get("k", 1101).is_none());
        assert!(cache.is_empty());
        assert!(cache.order_is_permutation_of_keys());
    }

    #[test]
    fn read_does_not_extend_lifetime() {
        let mut cache = TtlLruCache::new(settings(10, 100));
        cache.insert("k".to_string(), "v".to_string(), 0);

        assert!(cache.get("k", 90).is_some());
        assert!(cache.get("k", 101).is_none());
    }

    #[test]
    fn overwrite_restarts_lifetime() {
        let mut cache = TtlLruCache::new(settings(10, 100));
        cache.insert("k".to_string(), "v1".to_string(), 0);
        cache.insert("k".to_string(), "v2".to_string(), 80);

        assert_eq!(cache.get("k", 150).as_deref(), Some("v2"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn evicts_least_recently_used_at_capacity() {
        let mut cache = TtlLruCache::new(settings(2, 1000));
        cache.insert("a".to_string(), 1, 0);
        cache.insert("b".to_string(), 2, 0);

        // Touch "a" so "b" becomes the eviction victim.
        assert!(cache.get("a", 0).is_some());
        cache.insert("c".to_string(), 3, 0);

        assert!(cache.get("a", 0).is_some());
        assert!(cache.get("b", 0).is_none());
        assert!(cache.get("c", 0).is_some());
        assert_eq!(cache.len(), 2);
        assert!(cache.order_is_permutation_of_keys());
    }

    #[test]
    fn capacity_zero_disables_insertion() {
        let mut cache = TtlLruCache::new(settings(0, 1000));
        cache.insert("k".to_string(), "v".to_string(), 0);
        assert!(cache.get("k", 0).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn disabled_cache_never_stores_or_serves() {
        let mut cache = TtlLruCache::new(CacheSettings {
            enabled: false,
            max_entries: 10,
            expiration_ms: 1000,
        });
        cache.insert("k".to_string(), "v".to_string(), 0);
        assert!(cache.get("k", 0).is_none());
    }

    #[test]
    fn clear_empties_both_structures() {
        let mut cache = TtlLruCache::new(settings(10, 1000));
        cache.insert("a".to_string(), 1, 0);
        cache.insert("b".to_string(), 2, 0);
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.order_is_permutation_of_keys());
    }

    #[test]
    fn order_invariant_holds_under_mixed_operations() {
        let mut cache = TtlLruCache::new(settings(3, 50));
        for (step, key) in ["a", "b", "a", "c", "d", "b"].iter().enumerate() {
            cache.insert(key.to_string(), step, step as u64 * 10);
            cache.get("a", step as u64 * 10);
            assert!(cache.order_is_permutation_of_keys());
        }
        // Push past every TTL and confirm reads purge.
        for key in ["a", "b", "c", "d"] {
            cache.get(key, 10_000);
        }
        assert!(cache.is_empty());
        assert!(cache.order_is_permutation_of_keys());
    }

    #[test]
    fn text_keys_separate_modes_and_languages() {
        let a = text_key("hello", "translate", "fr");
        let b = text_key("hello", "translate", "de");
        let c = text_key("hello", "summarize", "fr");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, text_key("hello", "translate", "fr"));
    }

    #[test]
    fn content_keys_depend_only_on_content() {
        let a = content_key("aGVsbG8=");
        let b = content_key("aGVsbG8=");
        let c = content_key("d29ybGQ=");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }
}
