//! Response cache keyed by a prompt/code fingerprint.

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use codementor_core::config::ModelGatewayConfig;
use codementor_core::AiResponse;

#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            ttl: Duration::from_secs(3600),
        }
    }
}

impl From<&ModelGatewayConfig> for CacheConfig {
    fn from(config: &ModelGatewayConfig) -> Self {
        Self {
            max_entries: config.effective_cache_entries(),
            ttl: Duration::from_secs(config.effective_cache_ttl_secs()),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    response: AiResponse,
    stored_at: Instant,
    access_count: u64,
}

/// Hex SHA-256 over the prompt and optional code.
///
/// The separator keeps `("ab", "c")` and `("a", "bc")` apart.
pub fn fingerprint(prompt: &str, code: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update([0u8]);
    hasher.update(code.unwrap_or_default().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Bounded cache of provider answers.
///
/// When full, the entry with the lowest access count is evicted; ties go to
/// the entry refreshed longest ago.
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    config: CacheConfig,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Cached answer for `(prompt, code)`, marked `from_cache`.
    pub fn get(&self, prompt: &str, code: Option<&str>) -> Option<AiResponse> {
        let key = fingerprint(prompt, code);
        let mut entries = self.entries.lock();

        let expired = match entries.get(&key) {
            None => return None,
            Some(entry) => entry.stored_at.elapsed() > self.config.ttl,
        };
        if expired {
            entries.remove(&key);
            tracing::debug!(fingerprint = %key, "Cache entry expired");
            return None;
        }

        let entry = entries.get_mut(&key)?;
        entry.access_count += 1;
        entry.stored_at = Instant::now();

        let mut response = entry.response.clone();
        response.from_cache = true;
        Some(response)
    }

    pub fn insert(&self, prompt: &str, code: Option<&str>, response: AiResponse) {
        if self.config.max_entries == 0 {
            return;
        }
        let key = fingerprint(prompt, code);
        let mut entries = self.entries.lock();

        if !entries.contains_key(&key) && entries.len() >= self.config.max_entries {
            Self::evict_one(&mut entries);
        }
        entries.insert(
            key,
            CacheEntry {
                response,
                stored_at: Instant::now(),
                access_count: 1,
            },
        );
    }

    fn evict_one(entries: &mut HashMap<String, CacheEntry>) {
        let victim = entries
            .iter()
            .min_by(|(_, a), (_, b)| {
                a.access_count
                    .cmp(&b.access_count)
                    .then(a.stored_at.cmp(&b.stored_at))
            })
            .map(|(key, _)| key.clone());

        if let Some(key) = victim {
            entries.remove(&key);
            tracing::debug!(fingerprint = %key, "Cache entry evicted");
        }
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(content: &str) -> AiResponse {
        AiResponse {
            content: content.into(),
            provider_name: "DeepSeek".into(),
            response_time_ms: 12,
            from_cache: false,
            tokens_used: 0,
        }
    }

    fn cache(max_entries: usize) -> ResponseCache {
        ResponseCache::new(CacheConfig {
            max_entries,
            ttl: Duration::from_secs(60),
        })
    }

    #[test]
    fn test_fingerprint_is_bounded_and_separates_parts() {
        let long = "x".repeat(10_000);
        assert_eq!(fingerprint(&long, Some(&long)).len(), 64);
        assert_ne!(fingerprint("ab", Some("c")), fingerprint("a", Some("bc")));
        assert_eq!(fingerprint("p", None), fingerprint("p", Some("")));
        assert_eq!(
            fingerprint("", None),
            "6e340b9cffb37a989ca544e6bb780a2c78901d3fb33738768511a30617afa01d"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_is_marked_from_cache() {
        let cache = cache(10);
        assert!(cache.get("explain", Some("let x")).is_none());

        cache.insert("explain", Some("let x"), response("answer"));
        let hit = cache.get("explain", Some("let x")).unwrap();
        assert!(hit.from_cache);
        assert_eq!(hit.content, "answer");
        assert!(cache.get("explain", Some("let y")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = cache(10);
        cache.insert("p", None, response("a"));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get("p", None).is_some(), "hit refreshes the entry");

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get("p", None).is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get("p", None).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicts_lowest_access_count() {
        let cache = cache(3);
        cache.insert("a", None, response("a"));
        cache.insert("b", None, response("b"));
        cache.insert("c", None, response("c"));
        cache.get("a", None);
        cache.get("c", None);

        cache.insert("d", None, response("d"));
        assert_eq!(cache.len(), 3);
        assert!(cache.get("b", None).is_none());
        assert!(cache.get("a", None).is_some());
        assert!(cache.get("c", None).is_some());
        assert!(cache.get("d", None).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_ties_go_to_oldest() {
        let cache = cache(2);
        cache.insert("old", None, response("old"));
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert("new", None, response("new"));
        tokio::time::advance(Duration::from_secs(1)).await;

        cache.insert("newest", None, response("newest"));
        assert!(cache.get("old", None).is_none());
        assert!(cache.get("new", None).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_never_exceeds_cap() {
        let cache = cache(5);
        for i in 0..50 {
            cache.insert(&format!("prompt {}", i), None, response("r"));
            assert!(cache.len() <= 5);
        }
        cache.insert("prompt 49", None, response("replaced"));
        assert_eq!(cache.len(), 5);

        cache.clear();
        assert!(cache.is_empty());
    }
}
