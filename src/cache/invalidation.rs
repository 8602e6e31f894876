use super::store::CacheEntry;
use crate::classifier::Intent;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which entries an invalidation clears
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum InvalidationScope {
    All,
    Project { project: String },
    Intent { intent: Intent },
    ProjectIntent { project: String, intent: Intent },
}

impl InvalidationScope {
    pub fn matches(&self, entry: &CacheEntry) -> bool {
        let project_is = |p: &str| entry.project.as_deref() == Some(p);
        match self {
            Self::All => true,
            Self::Project { project } => project_is(project),
            Self::Intent { intent } => entry.intent == Some(*intent),
            Self::ProjectIntent { project, intent } => {
                project_is(project) && entry.intent == Some(*intent)
            }
        }
    }
}

impl fmt::Display for InvalidationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Project { project } => write!(f, "project:{}", project),
            Self::Intent { intent } => write!(f, "intent:{}", intent),
            Self::ProjectIntent { project, intent } => {
                write!(f, "project:{}/intent:{}", project, intent)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationReason {
    TtlExpiry,
    /// External change event such as a commit or deploy
    ExternalChange,
    Manual,
    ContextSwitch,
}

impl InvalidationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TtlExpiry => "ttl_expiry",
            Self::ExternalChange => "external_change",
            Self::Manual => "manual",
            Self::ContextSwitch => "context_switch",
        }
    }
}

/// Invalidation log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationRecord {
    pub timestamp: i64,
    pub reason: InvalidationReason,
    pub scope: InvalidationScope,
    pub cleared: usize,
    /// Triggering event name, for external changes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}
