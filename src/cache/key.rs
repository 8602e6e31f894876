//! Deterministic cache keys
//!
//! A key hashes the intent, the domain, a state signature and the
//! normalized request. The state signature is itself a hash over the
//! volatile facts an answer depends on (project, revision, branch, deploy
//! status), so a new commit or deploy changes every key without the
//! cache tracking those dependencies itself.

use crate::classifier::{Domain, Intent};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

const SIGNATURE_HEX_LEN: usize = 16;
const KEY_HEX_LEN: usize = 24;

/// Externally volatile facts a cached answer is valid for
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateFacts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_status: Option<String>,
}

impl StateFacts {
    pub fn is_empty(&self) -> bool {
        self.project.is_none()
            && self.revision.is_none()
            && self.branch.is_none()
            && self.deploy_status.is_none()
    }

    pub fn for_project(project: impl Into<String>) -> Self {
        Self {
            project: Some(project.into()),
            ..Self::default()
        }
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_deploy_status(mut self, status: impl Into<String>) -> Self {
        self.deploy_status = Some(status.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateSignature(String);

impl StateSignature {
    pub fn of(facts: &StateFacts) -> Self {
        let mut hasher = Sha256::new();
        for (label, value) in [
            ("project", &facts.project),
            ("revision", &facts.revision),
            ("branch", &facts.branch),
            ("deploy", &facts.deploy_status),
        ] {
            hasher.update(label.as_bytes());
            hasher.update(b"=");
            if let Some(value) = value {
                hasher.update(value.as_bytes());
            }
            hasher.update(b"\n");
        }
        let digest = hex::encode(hasher.finalize());
        Self(digest[..SIGNATURE_HEX_LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(
        intent: Intent,
        domain: &Domain,
        signature: &StateSignature,
        request: &str,
    ) -> Self {
        let material = format!(
            "{}:{}:{}:{}",
            intent.as_str(),
            domain.as_str(),
            signature.as_str(),
            normalize_request(request)
        );
        Self::hashed(&material)
    }

    /// Key for a context primer attached to `scope` (e.g. `project:billing`)
    pub fn primer(scope: &str) -> Self {
        Self::hashed(&format!("primer:{}", scope))
    }

    pub(crate) fn from_stored(key: String) -> Self {
        Self(key)
    }

    fn hashed(material: &str) -> Self {
        let digest = hex::encode(Sha256::digest(material.as_bytes()));
        Self(digest[..KEY_HEX_LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercased alphanumeric words joined by single spaces
///
/// "Thanks!" and "thanks" share a key; punctuation and spacing never
/// distinguish two requests.
pub fn normalize_request(request: &str) -> String {
    request
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
