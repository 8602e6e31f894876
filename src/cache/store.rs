//! Storage seam for cache entries
//!
//! Entries hold their payload as an encoded string so an unreadable entry
//! is detected at read time, the way a row in an external store would be.
//! The in-memory store is a sharded map; last writer wins on a key.

use crate::classifier::{Domain, Intent};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// What an entry holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryTier {
    /// A full answer served on exact or similarity match
    Exact,
    /// Context attached to a request that still goes to a provider
    Primer,
}

/// Decoded payload of an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub text: String,
    /// Destination that produced the answer; `None` for primers
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub tier: EntryTier,
    pub intent: Option<Intent>,
    pub domain: Domain,
    pub project: Option<String>,
    pub signature: String,
    /// JSON-encoded [`CachedResponse`]
    pub payload: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
    pub ttl_seconds: u64,
    pub created_at: i64,
    pub expires_at: i64,
    #[serde(default)]
    pub hit_count: u64,
}

impl CacheEntry {
    pub fn is_live(&self, now: i64) -> bool {
        now < self.expires_at
    }

    pub fn decode(&self) -> Result<CachedResponse, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Option<CacheEntry>;

    fn put(&self, entry: CacheEntry);

    fn remove(&self, key: &str) -> bool;

    /// Remove `key` only while `stale` holds for the entry stored under it.
    /// The check and the removal are atomic with respect to `put`.
    fn remove_if(&self, key: &str, stale: &dyn Fn(&CacheEntry) -> bool) -> bool;

    /// Count a hit against `key`. Approximate under concurrency.
    fn record_hit(&self, key: &str);

    /// Drop every entry for which `keep` is false; returns how many were dropped
    fn retain(&self, keep: &mut dyn FnMut(&CacheEntry) -> bool) -> usize;

    /// Visit every entry without cloning
    fn scan(&self, visit: &mut dyn FnMut(&CacheEntry));

    fn entries(&self) -> Vec<CacheEntry>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn put(&self, entry: CacheEntry) {
        self.entries.insert(entry.key.clone(), entry);
    }

    fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    fn remove_if(&self, key: &str, stale: &dyn Fn(&CacheEntry) -> bool) -> bool {
        self.entries.remove_if(key, |_, entry| stale(entry)).is_some()
    }

    fn record_hit(&self, key: &str) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.hit_count = entry.hit_count.saturating_add(1);
        }
    }

    fn retain(&self, keep: &mut dyn FnMut(&CacheEntry) -> bool) -> usize {
        let mut dropped = 0;
        self.entries.retain(|_, entry| {
            let kept = keep(entry);
            if !kept {
                dropped += 1;
            }
            kept
        });
        dropped
    }

    fn scan(&self, visit: &mut dyn FnMut(&CacheEntry)) {
        for entry in self.entries.iter() {
            visit(entry.value());
        }
    }

    fn entries(&self) -> Vec<CacheEntry> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
