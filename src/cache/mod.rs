//! Response cache
//!
//! Keys are deterministic hashes over (intent, domain, state signature,
//! normalized request). Entries live in a [`CacheStore`]; the
//! [`ResponseCache`] layer implements tiered lookup, the TTL policy,
//! invalidation, and snapshot persistence on top of it.

pub mod invalidation;
pub mod key;
pub mod layer;
pub mod similarity;
pub mod store;
pub mod ttl;

pub use invalidation::{InvalidationReason, InvalidationRecord, InvalidationScope};
pub use key::{CacheKey, StateFacts, StateSignature, normalize_request};
pub use layer::{CacheLookup, CacheStats, PrimerScope, ResponseCache};
pub use similarity::{Embedder, HashingEmbedder, cosine_similarity};
pub use store::{CacheEntry, CacheStore, CachedResponse, EntryTier, MemoryCacheStore};
pub use ttl::TtlTable;

use serde::{Deserialize, Serialize};

/// Which lookup tier answered, as recorded on the envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupKind {
    Exact,
    Similarity,
    /// Soft hit: context attached, provider still called
    Primer,
    Miss,
    /// Not a cacheable intent; store not consulted for answers
    Bypassed,
}

impl LookupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Similarity => "similarity",
            Self::Primer => "primer",
            Self::Miss => "miss",
            Self::Bypassed => "bypassed",
        }
    }

    /// A full answer was served without a provider call
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Exact | Self::Similarity)
    }
}
