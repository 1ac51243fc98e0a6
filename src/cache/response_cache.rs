//! LLM response cache with TTL expiry and LRU eviction.
//!
//! Persists to `~/.tallychat/cache/responses.json` as a versioned JSON
//! snapshot holding the entries in recency order plus the counters. Keys
//! come from [`super::key::derive_key`]. Entries expire once their age
//! reaches their TTL and are evicted least-recently-used when the store is
//! at capacity.
//!
//! Recency and entry membership live in one [`LruCache`], so the entry map
//! and the recency order cannot drift apart.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;
use crate::utils::{atomic_write, short};

/// Snapshot format version.
const SNAPSHOT_VERSION: u32 = 1;

/// A single cached LLM response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    /// The LLM response text.
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub ttl_secs: u64,
    /// Number of cache hits for this entry.
    pub hit_count: u64,
}

impl CacheEntry {
    /// Expired once `now - created_at >= ttl`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.created_at);
        let ttl = i64::try_from(self.ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX);
        age >= ttl
    }
}

/// Operation counters, persisted with the entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheCounters {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
}

/// On-disk form. `entries` runs least-recent first.
#[derive(Debug, Serialize, Deserialize)]
struct CacheSnapshot {
    version: u32,
    entries: Vec<CacheEntry>,
    stats: CacheCounters,
}

/// LLM response cache with TTL expiry, LRU eviction, and JSON persistence.
pub struct ResponseCache {
    entries: LruCache<String, CacheEntry>,
    counters: CacheCounters,
    path: Option<PathBuf>,
    ttl_secs: u64,
    max_entries: usize,
    enabled: bool,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("entries", &self.entries.len())
            .field("max_entries", &self.max_entries)
            .field("ttl_secs", &self.ttl_secs)
            .field("enabled", &self.enabled)
            .field("path", &self.path)
            .finish()
    }
}

impl ResponseCache {
    /// Create an in-memory cache with the given default TTL and capacity.
    ///
    /// `max_entries` is clamped to a minimum of 1.
    pub fn new(ttl_secs: u64, max_entries: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            counters: CacheCounters::default(),
            path: None,
            ttl_secs,
            max_entries: max_entries.max(1),
            enabled: true,
        }
    }

    /// Build from config, loading the on-disk snapshot when persistence is on.
    pub fn from_config(config: &Config) -> Self {
        let cache = Self::new(config.cache.ttl_secs, config.cache.max_entries)
            .with_enabled(config.cache.enabled);
        match config.cache_path() {
            Some(path) => cache.with_persistence(path),
            None => cache,
        }
    }

    /// Turn the cache on or off. A disabled cache never hits and never stores.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Persist to `path` after every mutation, loading what is already there.
    ///
    /// Entries that expired while the process was down are dropped.
    pub fn with_persistence(mut self, path: PathBuf) -> Self {
        if let Some(snapshot) = Self::load_from_disk(&path) {
            let now = Utc::now();
            let total = snapshot.entries.len();
            for entry in snapshot.entries {
                if entry.is_expired_at(now) {
                    continue;
                }
                // Oldest first, so the last put is the most recent.
                self.entries.put(entry.key.clone(), entry);
            }
            while self.entries.len() > self.max_entries {
                self.entries.pop_lru();
            }
            self.counters = snapshot.stats;
            debug!(
                path = %path.display(),
                loaded = self.entries.len(),
                dropped = total - self.entries.len(),
                "Loaded response cache"
            );
        }
        self.path = Some(path);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Look up a cached response. Returns `None` if disabled, absent or expired.
    ///
    /// An expired entry is removed and counted as a miss. A hit moves the key
    /// to most-recent and bumps its hit count, and is persisted like any
    /// other mutation.
    pub fn get(&mut self, key: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let now = Utc::now();
        let expired = self.entries.peek(key).map(|e| e.is_expired_at(now));
        match expired {
            Some(true) => {
                debug!(key = %short(key, 8), "Cache entry expired, removing");
                self.remove_key(key);
                self.counters.misses += 1;
                self.save_to_disk();
                None
            }
            Some(false) => {
                let entry = self.entries.get_mut(key)?;
                entry.hit_count = entry.hit_count.saturating_add(1);
                let value = entry.value.clone();
                self.counters.hits += 1;
                self.save_to_disk();
                Some(value)
            }
            None => {
                self.counters.misses += 1;
                None
            }
        }
    }

    /// Store a response with the default TTL. Returns `false` when disabled.
    pub fn set(&mut self, key: &str, value: &str) -> bool {
        self.set_with_ttl(key, value, self.ttl_secs)
    }

    /// Store a response with an explicit TTL. Returns `false` when disabled.
    ///
    /// A new key at capacity first evicts the least-recently-used entry.
    pub fn set_with_ttl(&mut self, key: &str, value: &str, ttl_secs: u64) -> bool {
        if !self.enabled {
            return false;
        }
        if !self.entries.contains(key) {
            while self.entries.len() >= self.max_entries {
                self.evict_lru();
            }
        }
        self.entries.put(
            key.to_string(),
            CacheEntry {
                key: key.to_string(),
                value: value.to_string(),
                created_at: Utc::now(),
                ttl_secs,
                hit_count: 0,
            },
        );
        self.counters.sets += 1;
        self.save_to_disk();
        true
    }

    /// Remove one entry. Returns whether it was present.
    pub fn delete(&mut self, key: &str) -> bool {
        let removed = self.remove_key(key);
        if removed {
            self.counters.deletes += 1;
            self.save_to_disk();
        }
        removed
    }

    /// Remove all entries and reset the counters.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.counters = CacheCounters::default();
        self.save_to_disk();
    }

    /// Delete every expired entry. Returns how many were removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let now = Utc::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired_at(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            if self.remove_key(key) {
                self.counters.deletes += 1;
            }
        }
        if !expired.is_empty() {
            debug!(removed = expired.len(), "Cleaned up expired cache entries");
            self.save_to_disk();
        }
        expired.len()
    }

    /// Current counters and occupancy.
    pub fn stats(&self) -> CacheStats {
        let lookups = self.counters.hits + self.counters.misses;
        CacheStats {
            enabled: self.enabled,
            entries: self.entries.len(),
            max_entries: self.max_entries,
            ttl_secs: self.ttl_secs,
            hits: self.counters.hits,
            misses: self.counters.misses,
            sets: self.counters.sets,
            deletes: self.counters.deletes,
            evictions: self.counters.evictions,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                self.counters.hits as f64 / lookups as f64
            },
        }
    }

    /// Keys ordered least-recent first.
    pub fn keys_by_recency(&self) -> Vec<String> {
        self.entries.iter().rev().map(|(k, _)| k.clone()).collect()
    }

    /// Read an entry without touching recency, counters or expiry.
    pub fn peek(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.peek(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // -- private helpers ---------------------------------------------------

    /// The single removal primitive behind delete, expiry and cleanup.
    fn remove_key(&mut self, key: &str) -> bool {
        self.entries.pop(key).is_some()
    }

    fn evict_lru(&mut self) {
        if let Some((lru_key, _)) = self.entries.pop_lru() {
            debug!(key = %short(&lru_key, 8), "Evicting LRU cache entry");
            self.counters.evictions += 1;
        }
    }

    fn load_from_disk(path: &Path) -> Option<CacheSnapshot> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read response cache, starting empty: {}", e);
                return None;
            }
        };
        match serde_json::from_str::<CacheSnapshot>(&data) {
            Ok(snapshot) if snapshot.version == SNAPSHOT_VERSION => Some(snapshot),
            Ok(snapshot) => {
                warn!(
                    version = snapshot.version,
                    "Response cache snapshot has unsupported version, starting empty"
                );
                None
            }
            Err(e) => {
                warn!("Response cache file is corrupt, starting empty: {}", e);
                None
            }
        }
    }

    /// Write the full snapshot. Failures are logged; the cache keeps working
    /// in memory.
    fn save_to_disk(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let snapshot = CacheSnapshot {
            version: SNAPSHOT_VERSION,
            entries: self.entries.iter().rev().map(|(_, e)| e.clone()).collect(),
            stats: self.counters,
        };
        match serde_json::to_vec_pretty(&snapshot) {
            Ok(data) => {
                if let Err(e) = atomic_write(path, &data) {
                    warn!(path = %path.display(), "Failed to save response cache: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize response cache: {}", e),
        }
    }
}

/// Cache statistics projection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    /// Number of entries currently in the cache.
    pub entries: usize,
    pub max_entries: usize,
    pub ttl_secs: u64,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    /// `hits / (hits + misses)`, 0 before any lookup.
    pub hit_rate: f64,
}
