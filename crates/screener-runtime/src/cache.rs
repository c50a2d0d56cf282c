//! Optional response cache.
//!
//! Keyed by stage, model and the exact rendered request, so a hit is only
//! possible for a byte-identical request. Only responses that decoded at the
//! batch level are stored.

use moka::future::Cache;
use std::time::Duration;

use screener_core::StageKind;

use crate::prompts::OracleRequest;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    stage: StageKind,
    model: String,
    request_hash: u64,
}

impl CacheKey {
    pub fn new(request: &OracleRequest, model: &str) -> Self {
        Self {
            stage: request.stage,
            model: model.to_string(),
            request_hash: request.fingerprint(),
        }
    }
}

/// Raw oracle response text cache using moka.
pub struct ResponseCache {
    cache: Cache<CacheKey, String>,
}

impl ResponseCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    pub async fn get(&self, key: &CacheKey) -> Option<String> {
        self.cache.get(key).await
    }

    pub async fn insert(&self, key: CacheKey, text: String) {
        self.cache.insert(key, text).await;
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(10_000, Duration::from_secs(3600))
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use screener_core::{Policy, Review};

    #[tokio::test]
    async fn test_cache_operations() {
        let cache = ResponseCache::default();
        let review = Review::new("t", "1.0 out of 5 stars", "The seller was rude.");
        let request = crate::prompts::initial_request(&Policy::marketplace_default(), &[&review]);

        let key = CacheKey::new(&request, "gpt-4o");
        assert!(cache.get(&key).await.is_none());

        cache
            .insert(key.clone(), r#"{"1":{"result":"no","reason":"seller"}}"#.to_string())
            .await;
        assert!(cache.get(&key).await.is_some());

        // Same request under another model misses
        assert!(cache.get(&CacheKey::new(&request, "gpt-4o-mini")).await.is_none());
    }
}
