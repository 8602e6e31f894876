//! Escalation markers
//!
//! Messages that trip any of these are the only ones allowed to reach the
//! remote classification tier.

use super::keyword::matching_terms;
use serde::Serialize;

pub const CODE_MARKERS: &[&str] = &[
    "```",
    "traceback",
    "stack trace",
    "exception",
    "docker",
    "npm",
    "pip",
    "railway",
    "systemd",
    "python",
    "def ",
];

pub const WORKFLOW_TERMS: &[&str] = &[
    "bug",
    "fix",
    "review",
    "refactor",
    "pr",
    "pull request",
    "test failing",
    "deploy",
    "ci",
    "pipeline",
];

pub const ARCHITECTURE_TERMS: &[&str] = &[
    "system design",
    "module",
    "interface",
    "api contract",
    "schema",
    "routing",
];

pub const SECURITY_TERMS: &[&str] = &["key", "token", "leak", "exposed", "cve", "auth"];

/// Messages at least this long that also mention engineering vocabulary
/// count as escalation on their own
pub const LONG_REQUEST_CHARS: usize = 400;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EscalationReport {
    pub code: Vec<&'static str>,
    pub workflow: Vec<&'static str>,
    pub architecture: Vec<&'static str>,
    pub security: Vec<&'static str>,
    pub long_technical: bool,
}

impl EscalationReport {
    pub fn triggered(&self) -> bool {
        !self.code.is_empty()
            || !self.workflow.is_empty()
            || !self.architecture.is_empty()
            || !self.security.is_empty()
            || self.long_technical
    }

    /// Short human-readable reasons, e.g. `security: token`
    pub fn reasons(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        for (label, hits) in [
            ("code markers", &self.code),
            ("workflow", &self.workflow),
            ("architecture", &self.architecture),
            ("security", &self.security),
        ] {
            if !hits.is_empty() {
                reasons.push(format!("{}: {}", label, hits.join(", ")));
            }
        }
        if self.long_technical {
            reasons.push("long+technical request".to_string());
        }
        reasons
    }
}

pub fn detect_escalation(message: &str) -> EscalationReport {
    let lowered = message.to_lowercase();
    let mut report = EscalationReport {
        code: matching_terms(&lowered, CODE_MARKERS),
        workflow: matching_terms(&lowered, WORKFLOW_TERMS),
        architecture: matching_terms(&lowered, ARCHITECTURE_TERMS),
        security: matching_terms(&lowered, SECURITY_TERMS),
        long_technical: false,
    };
    report.long_technical = message.chars().count() >= LONG_REQUEST_CHARS
        && !(report.code.is_empty()
            && report.workflow.is_empty()
            && report.architecture.is_empty()
            && report.security.is_empty());
    report
}
