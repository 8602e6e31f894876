//! Inbound message and request priority

use crate::cache::StateFacts;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Request priority used by priority-aware diversion
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!(
                "unknown priority '{}', expected low, normal, high or critical",
                other
            )),
        }
    }
}

/// Message as received from a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    text: String,
    sender: String,
    medium: String,
    received_at: i64,
    #[serde(default)]
    priority: Priority,
    #[serde(default)]
    state: StateFacts,
}

impl InboundMessage {
    pub fn new(
        text: impl Into<String>,
        sender: impl Into<String>,
        medium: impl Into<String>,
        received_at: i64,
    ) -> Self {
        Self {
            text: text.into(),
            sender: sender.into(),
            medium: medium.into(),
            received_at,
            priority: Priority::default(),
            state: StateFacts::default(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Attach the volatile facts (revision, deploy status) the answer depends on
    pub fn with_state(mut self, state: StateFacts) -> Self {
        self.state = state;
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn medium(&self) -> &str {
        &self.medium
    }

    pub fn received_at(&self) -> i64 {
        self.received_at
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn state(&self) -> &StateFacts {
        &self.state
    }
}
