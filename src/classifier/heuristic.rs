//! Deterministic last-chance heuristic

use super::keyword::find_term;
use super::{EscalationReport, Intent};

/// Messages shorter than this with no other signal read as acknowledgements
const SHORT_MESSAGE_CHARS: usize = 80;
const SHORT_MESSAGE_WORDS: usize = 5;

/// Derive an intent from escalation markers and message shape
///
/// Returns `None` when nothing points anywhere; the cascade then falls
/// back to the safe default.
pub fn derive_intent(message: &str, report: &EscalationReport) -> Option<Intent> {
    let lowered = message.to_lowercase();

    if !report.security.is_empty() {
        return Some(Intent::Security);
    }
    if !report.architecture.is_empty() {
        return Some(Intent::Architecture);
    }
    if !report.code.is_empty() {
        return Some(Intent::Debugging);
    }
    if !report.workflow.is_empty() {
        return Some(Intent::CodeReview);
    }
    if find_term(&lowered, "how").is_some() || find_term(&lowered, "instructions").is_some() {
        return Some(Intent::HowTo);
    }

    let trimmed = message.trim();
    if !trimmed.is_empty()
        && trimmed.chars().count() < SHORT_MESSAGE_CHARS
        && trimmed.split_whitespace().count() < SHORT_MESSAGE_WORDS
    {
        return Some(Intent::Trivial);
    }
    None
}
