//! Response cache.
//!
//! Purely an optimization: a miss only costs latency. Expiry is checked
//! lazily on read, capacity is enforced on write by evicting the oldest
//! entries. Concurrent writers for one key race and the last one wins.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use datasage_core::analytics::Row;
use datasage_core::domain::conversation::AgentMode;

/// The part of an answer worth replaying.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CachedAnswer {
    pub answer: String,
    pub sql: Option<String>,
    pub tools_used: Vec<String>,
    pub results: Vec<Row>,
}

#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub key: String,
    pub value: CachedAnswer,
    pub created_at: Instant,
    pub expires_at: Instant,
    sequence: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub max_entries: usize,
    pub ttl_secs: u64,
    pub hit_rate: f64,
}

pub struct ResponseCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
    sequence: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// First 32 hex chars of SHA-256 over the normalized question, the mode and
/// the identity.
pub fn cache_key(question: &str, mode: AgentMode, identity: &str) -> String {
    let normalized = question.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.update([0u8]);
    hasher.update(mode.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(identity.as_bytes());
    let digest = hasher.finalize();

    digest.iter().take(16).map(|byte| format!("{byte:02x}")).collect()
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
            sequence: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub async fn get(&self, key: &str) -> Option<CachedAnswer> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        // expired: drop it unless a writer refreshed it meanwhile
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(event_name = "agent.cache.expired", key, "cache entry expired");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub async fn put(&self, key: impl Into<String>, value: CachedAnswer) {
        let key = key.into();
        let now = Instant::now();
        let entry = CacheEntry {
            key: key.clone(),
            value,
            created_at: now,
            expires_at: now + self.ttl,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        };

        let mut entries = self.entries.write().await;
        entries.insert(key, entry);

        if entries.len() > self.max_entries {
            let before = entries.len();
            entries.retain(|_, entry| !entry.is_expired(now));
            self.evictions.fetch_add((before - entries.len()) as u64, Ordering::Relaxed);
        }

        while entries.len() > self.max_entries {
            let Some(oldest) = entries
                .values()
                .min_by_key(|entry| (entry.created_at, entry.sequence))
                .map(|entry| entry.key.clone())
            else {
                break;
            };
            entries.remove(&oldest);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(event_name = "agent.cache.evicted", key = %oldest, "cache capacity eviction");
        }
    }

    pub async fn invalidate(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.write().await;
        let cleared = entries.len();
        entries.clear();
        cleared
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await.len();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        CacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            entries,
            max_entries: self.max_entries,
            ttl_secs: self.ttl.as_secs(),
            hit_rate: if lookups == 0 { 0.0 } else { hits as f64 / lookups as f64 },
        }
    }
}
