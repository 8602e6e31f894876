//! Tiered response cache
//!
//! Lookup order is exact key, then nearest neighbour over stored request
//! embeddings, then context primer. A primer is a soft hit: the request
//! still goes to a provider, with the primer text attached. Expiry is
//! checked lazily on every read and swept periodically by the server.

use super::invalidation::{InvalidationReason, InvalidationRecord, InvalidationScope};
use super::key::{CacheKey, StateSignature};
use super::similarity::{Embedder, cosine_similarity};
use super::store::{CacheEntry, CacheStore, CachedResponse, EntryTier};
use super::{LookupKind, TtlTable};
use crate::audit::{AuditRecord, AuditSink};
use crate::classifier::{Classification, Domain};
use crate::clock::Clock;
use crate::envelope::InboundMessage;
use crate::error::{AppError, AppResult};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

const SNAPSHOT_VERSION: u32 = 1;

/// Scope a context primer is attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimerScope {
    Project(String),
    Domain(Domain),
}

impl PrimerScope {
    pub fn label(&self) -> String {
        match self {
            Self::Project(project) => format!("project:{}", project),
            Self::Domain(domain) => format!("domain:{}", domain),
        }
    }
}

/// Result of a tiered lookup
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// Served from cache; `kind` is exact or similarity
    Hit {
        kind: LookupKind,
        key: CacheKey,
        similarity: Option<f32>,
        response: CachedResponse,
    },
    Primer {
        key: CacheKey,
        scope: String,
        text: String,
    },
    Miss {
        key: CacheKey,
    },
    /// Intent is never cached and no primer applies
    Bypassed,
}

impl CacheLookup {
    pub fn kind(&self) -> LookupKind {
        match self {
            Self::Hit { kind, .. } => *kind,
            Self::Primer { .. } => LookupKind::Primer,
            Self::Miss { .. } => LookupKind::Miss,
            Self::Bypassed => LookupKind::Bypassed,
        }
    }

    pub fn key(&self) -> Option<&CacheKey> {
        match self {
            Self::Hit { key, .. } | Self::Primer { key, .. } | Self::Miss { key } => Some(key),
            Self::Bypassed => None,
        }
    }

    pub fn similarity(&self) -> Option<f32> {
        match self {
            Self::Hit { similarity, .. } => *similarity,
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    exact_hits: AtomicU64,
    similarity_hits: AtomicU64,
    primer_hits: AtomicU64,
    misses: AtomicU64,
    bypassed: AtomicU64,
    writes: AtomicU64,
    skipped_writes: AtomicU64,
    evictions: AtomicU64,
    corrupted: AtomicU64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

/// Approximate counters; monotonic, not exact under concurrency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub exact_hits: u64,
    pub similarity_hits: u64,
    pub primer_hits: u64,
    pub misses: u64,
    pub bypassed: u64,
    pub writes: u64,
    pub skipped_writes: u64,
    pub evictions: u64,
    pub corrupted: u64,
    pub entries: usize,
    pub hit_rate_percent: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    saved_at: i64,
    entries: Vec<serde_json::Value>,
}

pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    embedder: Arc<dyn Embedder>,
    ttl: TtlTable,
    similarity_threshold: f32,
    primer_ttl_seconds: u64,
    contexts: DashMap<String, String>,
    counters: Counters,
    audit: Option<Arc<dyn AuditSink>>,
}

impl ResponseCache {
    pub fn new(
        store: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        embedder: Arc<dyn Embedder>,
        ttl: TtlTable,
        similarity_threshold: f32,
    ) -> Self {
        Self {
            store,
            clock,
            embedder,
            ttl,
            similarity_threshold,
            primer_ttl_seconds: 3600,
            contexts: DashMap::new(),
            counters: Counters::default(),
            audit: None,
        }
    }

    pub fn with_primer_ttl(mut self, seconds: u64) -> Self {
        self.primer_ttl_seconds = seconds;
        self
    }

    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn ttl_table(&self) -> &TtlTable {
        &self.ttl
    }

    /// Whether an answer for this classification may be stored at all
    pub fn is_cacheable(&self, classification: &Classification) -> bool {
        classification.cacheable && self.ttl.is_cached(classification.intent)
    }

    pub fn key_for(&self, classification: &Classification, message: &InboundMessage) -> CacheKey {
        CacheKey::derive(
            classification.intent,
            &classification.domain,
            &StateSignature::of(message.state()),
            message.text(),
        )
    }

    /// Exact → similarity → primer
    pub fn lookup(&self, classification: &Classification, message: &InboundMessage) -> CacheLookup {
        let now = self.clock.now_epoch();

        if !self.is_cacheable(classification) {
            if let Some(primer) = self.find_primer(classification, message, now) {
                return primer;
            }
            bump(&self.counters.bypassed, 1);
            return CacheLookup::Bypassed;
        }

        let key = self.key_for(classification, message);

        if let Some(entry) = self.store.get(key.as_str()) {
            if entry.tier == EntryTier::Exact {
                if let Some(response) = self.read_live(&entry, now) {
                    self.store.record_hit(key.as_str());
                    bump(&self.counters.exact_hits, 1);
                    tracing::debug!(key = %key, "Exact cache hit");
                    return CacheLookup::Hit {
                        kind: LookupKind::Exact,
                        key,
                        similarity: None,
                        response,
                    };
                }
            }
        }

        if let Some(hit) = self.find_similar(classification, message, now) {
            return hit;
        }

        if let Some(primer) = self.find_primer(classification, message, now) {
            return primer;
        }

        bump(&self.counters.misses, 1);
        CacheLookup::Miss { key }
    }

    /// Store a provider answer; intents with a zero TTL bypass the store
    pub fn store(
        &self,
        classification: &Classification,
        message: &InboundMessage,
        response: &CachedResponse,
    ) -> Option<CacheKey> {
        if !self.is_cacheable(classification) {
            bump(&self.counters.skipped_writes, 1);
            tracing::debug!(
                intent = %classification.intent,
                "Skipping cache write for non-cacheable intent"
            );
            return None;
        }

        let payload = match serde_json::to_string(response) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode cache payload, write skipped");
                bump(&self.counters.skipped_writes, 1);
                return None;
            }
        };

        let now = self.clock.now_epoch();
        let ttl = self.ttl.ttl_for(classification.intent);
        let key = self.key_for(classification, message);
        self.store.put(CacheEntry {
            key: key.as_str().to_string(),
            tier: EntryTier::Exact,
            intent: Some(classification.intent),
            domain: classification.domain.clone(),
            project: message.state().project.clone(),
            signature: StateSignature::of(message.state()).as_str().to_string(),
            payload,
            embedding: self.embedder.embed(message.text()),
            ttl_seconds: ttl,
            created_at: now,
            expires_at: now.saturating_add(i64::try_from(ttl).unwrap_or(i64::MAX)),
            hit_count: 0,
        });
        bump(&self.counters.writes, 1);
        tracing::debug!(
            key = %key,
            ttl_seconds = ttl,
            intent = %classification.intent,
            "Cached response"
        );
        Some(key)
    }

    /// Attach (or replace) the context primer for `scope`
    pub fn put_primer(&self, scope: &PrimerScope, text: impl Into<String>) -> CacheKey {
        let now = self.clock.now_epoch();
        let label = scope.label();
        let key = CacheKey::primer(&label);
        let payload = CachedResponse {
            text: text.into(),
            destination: None,
            tokens: 0,
        };
        // CachedResponse holds only strings and integers; encoding cannot fail
        let payload = serde_json::to_string(&payload).unwrap_or_default();
        let (project, domain) = match scope {
            PrimerScope::Project(project) => (Some(project.clone()), Domain::general()),
            PrimerScope::Domain(domain) => (None, domain.clone()),
        };
        self.store.put(CacheEntry {
            key: key.as_str().to_string(),
            tier: EntryTier::Primer,
            intent: None,
            domain,
            project,
            signature: String::new(),
            payload,
            embedding: Vec::new(),
            ttl_seconds: self.primer_ttl_seconds,
            created_at: now,
            expires_at: now
                .saturating_add(i64::try_from(self.primer_ttl_seconds).unwrap_or(i64::MAX)),
            hit_count: 0,
        });
        tracing::debug!(scope = %label, "Context primer stored");
        key
    }

    pub fn invalidate(
        &self,
        scope: InvalidationScope,
        reason: InvalidationReason,
    ) -> InvalidationRecord {
        self.invalidate_with_event(scope, reason, None)
    }

    /// Invalidate in response to a named external change (commit, deploy)
    pub fn invalidate_for_event(
        &self,
        event: impl Into<String>,
        scope: InvalidationScope,
    ) -> InvalidationRecord {
        self.invalidate_with_event(scope, InvalidationReason::ExternalChange, Some(event.into()))
    }

    fn invalidate_with_event(
        &self,
        scope: InvalidationScope,
        reason: InvalidationReason,
        event: Option<String>,
    ) -> InvalidationRecord {
        let cleared = self.store.retain(&mut |entry| !scope.matches(entry));
        if scope == InvalidationScope::All {
            self.contexts.clear();
        }
        bump(&self.counters.evictions, cleared as u64);

        let record = InvalidationRecord {
            timestamp: self.clock.now_epoch(),
            reason,
            scope,
            cleared,
            event,
        };
        tracing::info!(
            reason = reason.as_str(),
            scope = %record.scope,
            cleared = cleared,
            "Cache invalidated"
        );
        self.log_invalidation(&record);
        record
    }

    /// Record the current context (e.g. branch) of `project`
    ///
    /// A change from the previously seen context clears the whole cache:
    /// state signatures computed under the old context no longer apply
    /// uniformly. The first observation only records the context.
    pub fn observe_context(&self, project: &str, context: &str) -> Option<InvalidationRecord> {
        let previous = self
            .contexts
            .insert(project.to_string(), context.to_string());
        match previous {
            Some(previous) if previous != context => {
                tracing::info!(
                    project = project,
                    from = %previous,
                    to = context,
                    "Context switch detected"
                );
                let record =
                    self.invalidate(InvalidationScope::All, InvalidationReason::ContextSwitch);
                self.contexts
                    .insert(project.to_string(), context.to_string());
                Some(record)
            }
            _ => None,
        }
    }

    /// Sweep expired entries; returns how many were removed
    pub fn clear_expired(&self) -> usize {
        let now = self.clock.now_epoch();
        let cleared = self.store.retain(&mut |entry| entry.is_live(now));
        if cleared > 0 {
            bump(&self.counters.evictions, cleared as u64);
            let record = InvalidationRecord {
                timestamp: now,
                reason: InvalidationReason::TtlExpiry,
                scope: InvalidationScope::All,
                cleared,
                event: None,
            };
            tracing::info!(cleared = cleared, "Cleared expired cache entries");
            self.log_invalidation(&record);
        }
        cleared
    }

    pub fn stats(&self) -> CacheStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let exact_hits = load(&self.counters.exact_hits);
        let similarity_hits = load(&self.counters.similarity_hits);
        let primer_hits = load(&self.counters.primer_hits);
        let misses = load(&self.counters.misses);
        let hits = exact_hits + similarity_hits;
        let lookups = hits + primer_hits + misses;
        let hit_rate_percent = if lookups == 0 {
            0.0
        } else {
            (hits as f64 / lookups as f64 * 1000.0).round() / 10.0
        };
        CacheStats {
            exact_hits,
            similarity_hits,
            primer_hits,
            misses,
            bypassed: load(&self.counters.bypassed),
            writes: load(&self.counters.writes),
            skipped_writes: load(&self.counters.skipped_writes),
            evictions: load(&self.counters.evictions),
            corrupted: load(&self.counters.corrupted),
            entries: self.store.len(),
            hit_rate_percent,
        }
    }

    /// Write every live entry to `path` as a JSON snapshot
    pub fn persist(&self, path: &Path) -> AppResult<usize> {
        let now = self.clock.now_epoch();
        let snapshot_error = |reason: String| AppError::Snapshot {
            path: path.display().to_string(),
            reason,
        };

        let mut entries = Vec::new();
        for entry in self.store.entries().into_iter().filter(|e| e.is_live(now)) {
            entries.push(serde_json::to_value(&entry).map_err(|e| snapshot_error(e.to_string()))?);
        }
        let count = entries.len();
        let encoded = serde_json::to_vec(&Snapshot {
            version: SNAPSHOT_VERSION,
            saved_at: now,
            entries,
        })
        .map_err(|e| snapshot_error(e.to_string()))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| snapshot_error(e.to_string()))?;
        }
        let staging = path.with_extension("tmp");
        std::fs::write(&staging, encoded).map_err(|e| snapshot_error(e.to_string()))?;
        std::fs::rename(&staging, path).map_err(|e| snapshot_error(e.to_string()))?;

        tracing::info!(path = %path.display(), entries = count, "Cache snapshot written");
        Ok(count)
    }

    /// Load entries from a snapshot written by [`persist`](Self::persist)
    ///
    /// A missing file restores nothing. Entries that fail to decode, or
    /// whose payload is unreadable, are dropped and counted as corrupted;
    /// expired entries are skipped.
    pub fn restore(&self, path: &Path) -> AppResult<usize> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No cache snapshot to restore");
                return Ok(0);
            }
            Err(e) => {
                return Err(AppError::Snapshot {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        };
        let snapshot: Snapshot = serde_json::from_slice(&raw).map_err(|e| AppError::Snapshot {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(AppError::Snapshot {
                path: path.display().to_string(),
                reason: format!(
                    "unsupported snapshot version {} (expected {})",
                    snapshot.version, SNAPSHOT_VERSION
                ),
            });
        }

        let now = self.clock.now_epoch();
        let mut restored = 0;
        let mut dropped = 0;
        for value in snapshot.entries {
            match serde_json::from_value::<CacheEntry>(value) {
                Ok(entry) if entry.decode().is_err() => dropped += 1,
                Ok(entry) if entry.is_live(now) => {
                    self.store.put(entry);
                    restored += 1;
                }
                Ok(_) => {}
                Err(_) => dropped += 1,
            }
        }
        bump(&self.counters.corrupted, dropped);
        if dropped > 0 {
            tracing::warn!(
                path = %path.display(),
                dropped = dropped,
                "Dropped unreadable entries from cache snapshot"
            );
        }
        tracing::info!(path = %path.display(), restored = restored, "Cache snapshot restored");
        Ok(restored)
    }

    /// Decode a live entry; expired or unreadable entries are deleted
    ///
    /// Deletion is conditional on the stored entry still being the one that
    /// was read, so a concurrent write under the same key survives.
    fn read_live(&self, entry: &CacheEntry, now: i64) -> Option<CachedResponse> {
        if !entry.is_live(now) {
            if self.store.remove_if(&entry.key, &|current| !current.is_live(now)) {
                bump(&self.counters.evictions, 1);
            }
            return None;
        }
        match entry.decode() {
            Ok(response) => Some(response),
            Err(e) => {
                let unchanged = |current: &CacheEntry| {
                    current.created_at == entry.created_at && current.payload == entry.payload
                };
                if self.store.remove_if(&entry.key, &unchanged) {
                    tracing::warn!(key = %entry.key, error = %e, "Corrupted cache entry deleted");
                }
                bump(&self.counters.corrupted, 1);
                None
            }
        }
    }

    fn find_similar(
        &self,
        classification: &Classification,
        message: &InboundMessage,
        now: i64,
    ) -> Option<CacheLookup> {
        let query = self.embedder.embed(message.text());
        if query.is_empty() {
            return None;
        }
        let signature = StateSignature::of(message.state());

        let mut best: Option<(f32, CacheEntry)> = None;
        self.store.scan(&mut |entry| {
            if entry.tier != EntryTier::Exact
                || entry.intent != Some(classification.intent)
                || entry.domain != classification.domain
                || entry.signature != signature.as_str()
                || !entry.is_live(now)
            {
                return;
            }
            let score = cosine_similarity(&query, &entry.embedding);
            if score >= self.similarity_threshold
                && best.as_ref().is_none_or(|(top, _)| score > *top)
            {
                best = Some((score, entry.clone()));
            }
        });

        let (score, entry) = best?;
        let response = self.read_live(&entry, now)?;
        self.store.record_hit(&entry.key);
        bump(&self.counters.similarity_hits, 1);
        tracing::debug!(key = %entry.key, similarity = score, "Similarity cache hit");
        Some(CacheLookup::Hit {
            kind: LookupKind::Similarity,
            key: CacheKey::from_stored(entry.key),
            similarity: Some(score),
            response,
        })
    }

    /// Project primer first, then domain primer
    fn find_primer(
        &self,
        classification: &Classification,
        message: &InboundMessage,
        now: i64,
    ) -> Option<CacheLookup> {
        let mut scopes = Vec::with_capacity(2);
        if let Some(project) = &message.state().project {
            scopes.push(PrimerScope::Project(project.clone()));
        }
        scopes.push(PrimerScope::Domain(classification.domain.clone()));

        for scope in scopes {
            let label = scope.label();
            let key = CacheKey::primer(&label);
            let Some(entry) = self.store.get(key.as_str()) else {
                continue;
            };
            if entry.tier != EntryTier::Primer {
                continue;
            }
            if let Some(primer) = self.read_live(&entry, now) {
                self.store.record_hit(key.as_str());
                bump(&self.counters.primer_hits, 1);
                tracing::debug!(scope = %label, "Context primer attached");
                return Some(CacheLookup::Primer {
                    key,
                    scope: label,
                    text: primer.text,
                });
            }
        }
        None
    }

    fn log_invalidation(&self, record: &InvalidationRecord) {
        let Some(sink) = &self.audit else {
            return;
        };
        if let Err(e) = sink.append(&AuditRecord::Invalidation(record.clone())) {
            tracing::warn!(error = %e, "Failed to record cache invalidation");
        }
    }
}
