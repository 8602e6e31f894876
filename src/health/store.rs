//! Storage seam for provider health records
//!
//! [`HealthTracker`](super::HealthTracker) owns the breaker rules; stores only
//! hold records. The in-memory store is sharded so updates for different
//! providers never contend on one lock. A shared external store for
//! multi-process deployments implements the same trait.

use super::{ProviderHealth, ProviderKey};
use dashmap::DashMap;

pub trait HealthStore: Send + Sync {
    fn get(&self, key: &ProviderKey) -> Option<ProviderHealth>;

    /// Apply `update` to the record for `key`, creating the record first if
    /// none exists. Returns the record as stored after the update.
    fn update(
        &self,
        key: &ProviderKey,
        now: i64,
        update: &mut dyn FnMut(&mut ProviderHealth),
    ) -> ProviderHealth;

    fn all(&self) -> Vec<ProviderHealth>;
}

/// Concurrent in-memory store for single-process deployments
#[derive(Debug, Default)]
pub struct MemoryHealthStore {
    records: DashMap<ProviderKey, ProviderHealth>,
}

impl MemoryHealthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl HealthStore for MemoryHealthStore {
    fn get(&self, key: &ProviderKey) -> Option<ProviderHealth> {
        self.records.get(key).map(|record| record.value().clone())
    }

    fn update(
        &self,
        key: &ProviderKey,
        now: i64,
        update: &mut dyn FnMut(&mut ProviderHealth),
    ) -> ProviderHealth {
        // The entry guard holds the shard lock for the whole read-modify-write
        let mut record = self
            .records
            .entry(key.clone())
            .or_insert_with(|| ProviderHealth::new(key.clone(), now));
        update(record.value_mut());
        record.value().clone()
    }

    fn all(&self) -> Vec<ProviderHealth> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }
}
