use crate::classifier::Intent;
use std::collections::HashMap;

/// Intent → TTL seconds; zero means the intent is never cached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlTable {
    ttls: HashMap<Intent, u64>,
}

impl TtlTable {
    pub fn new(ttls: HashMap<Intent, u64>) -> Self {
        Self { ttls }
    }

    /// Built-in table with `overrides` applied on top
    pub fn with_overrides(overrides: &HashMap<Intent, u64>) -> Self {
        let mut table = Self::default();
        table.ttls.extend(overrides.iter().map(|(i, t)| (*i, *t)));
        table
    }

    pub fn ttl_for(&self, intent: Intent) -> u64 {
        self.ttls.get(&intent).copied().unwrap_or(0)
    }

    pub fn is_cached(&self, intent: Intent) -> bool {
        self.ttl_for(intent) > 0
    }
}

impl Default for TtlTable {
    fn default() -> Self {
        Self::new(HashMap::from([
            (Intent::StatusCheck, 60),
            (Intent::HowTo, 3600),
            (Intent::Trivial, 86_400),
        ]))
    }
}
