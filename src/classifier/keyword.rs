//! Keyword tier: zero-latency pattern match

use super::Intent;

/// Keyword table, checked top to bottom
///
/// Specific failure vocabulary is checked before the broad status and
/// acknowledgement phrases, so "why is the deploy not working" is debugging
/// rather than a status check.
const KEYWORD_TABLE: &[(Intent, &[&str])] = &[
    (
        Intent::Debugging,
        &[
            "error",
            "broken",
            "fix",
            "debug",
            "why",
            "not working",
            "issue",
            "bug",
            "failed",
            "crash",
            "exception",
        ],
    ),
    (
        Intent::CodeReview,
        &[
            "code review",
            "review",
            "check this",
            "look at",
            "pull request",
            "pr",
            "audit",
            "feedback on code",
        ],
    ),
    (
        Intent::FeatureWork,
        &[
            "new feature",
            "build",
            "add",
            "create",
            "implement",
            "develop",
            "task",
            "epic",
            "story",
        ],
    ),
    (
        Intent::HowTo,
        &[
            "how do i",
            "how to",
            "what's the command",
            "how can i",
            "guide",
            "tutorial",
            "documentation",
            "help with",
        ],
    ),
    (
        Intent::StatusCheck,
        &[
            "health check",
            "status",
            "running",
            "health",
            "uptime",
            "working",
            "how is",
            "is the",
            "alive",
        ],
    ),
    (
        Intent::Trivial,
        &[
            "thanks",
            "thank you",
            "ok",
            "cool",
            "nice",
            "good job",
            "got it",
            "understood",
            "acknowledged",
        ],
    ),
];

/// First-tier classifier over a fixed keyword table
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Intent and matched keyword, if any keyword appears as a whole term
    pub fn classify(&self, message: &str) -> Option<(Intent, &'static str)> {
        let lowered = message.to_lowercase();
        KEYWORD_TABLE.iter().find_map(|(intent, keywords)| {
            keywords
                .iter()
                .find(|keyword| find_term(&lowered, keyword).is_some())
                .map(|keyword| (*intent, *keyword))
        })
    }
}

/// Position of `term` in `text` where it stands as a whole term
///
/// An alphanumeric edge of `term` must border a non-alphanumeric
/// character (or the string edge), so "pr" does not match "print" and
/// "fix" does not match "prefix". Non-alphanumeric edges such as the
/// trailing space in "def " match anywhere.
pub(crate) fn find_term(text: &str, term: &str) -> Option<usize> {
    if term.is_empty() {
        return None;
    }
    let bytes = text.as_bytes();
    let term_bytes = term.as_bytes();
    let check_before = term_bytes[0].is_ascii_alphanumeric();
    let check_after = term_bytes[term_bytes.len() - 1].is_ascii_alphanumeric();

    for (pos, _) in text.match_indices(term) {
        let before_is_boundary =
            !check_before || pos == 0 || !bytes[pos - 1].is_ascii_alphanumeric();
        let after = pos + term.len();
        let after_is_boundary =
            !check_after || after >= bytes.len() || !bytes[after].is_ascii_alphanumeric();
        if before_is_boundary && after_is_boundary {
            return Some(pos);
        }
    }
    None
}

/// Every term from `terms` that appears in `text` (lowercase input expected)
pub(crate) fn matching_terms(text: &str, terms: &[&'static str]) -> Vec<&'static str> {
    terms
        .iter()
        .copied()
        .filter(|term| find_term(text, term).is_some())
        .collect()
}
