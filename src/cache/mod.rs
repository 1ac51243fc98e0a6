//! LLM response caching with TTL, LRU eviction, and JSON persistence.

pub mod key;
pub mod response_cache;

pub use key::derive_key;
pub use response_cache::{CacheEntry, CacheStats, ResponseCache};

/// A cache shared by every session of one process.
///
/// Sessions are independent but cache entries are keyed purely by content
/// and parameters, so one store serves all of them; the mutex serializes
/// each operation as a whole.
pub type SharedCache = std::sync::Arc<tokio::sync::Mutex<ResponseCache>>;

/// Wrap a cache for sharing across sessions.
pub fn shared(cache: ResponseCache) -> SharedCache {
    std::sync::Arc::new(tokio::sync::Mutex::new(cache))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_handles_point_at_one_store() {
        let cache = shared(ResponseCache::new(60, 4));
        let other = std::sync::Arc::clone(&cache);
        tokio_test::block_on(async {
            cache.lock().await.set("k", "v");
            assert_eq!(other.lock().await.get("k").as_deref(), Some("v"));
        });
    }
}
