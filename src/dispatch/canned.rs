//! Fixed replies for trivial messages

use crate::cache::normalize_request;

const CANNED_REPLIES: &[(&[&str], &str)] = &[
    (
        &["thanks", "thank you", "thx", "ty", "cheers"],
        "You're welcome!",
    ),
    (
        &["ok", "okay", "got it", "understood", "acknowledged", "cool", "nice", "good job"],
        "Got it.",
    ),
    (&["hi", "hello", "hey", "yo"], "Hey! What can I help you with?"),
];

/// Reply for a message that is exactly one of the known phrases
///
/// Only whole-message matches qualify; "thanks, but the deploy failed"
/// is not trivial.
pub fn canned_reply(message: &str) -> Option<&'static str> {
    let normalized = normalize_request(message);
    CANNED_REPLIES
        .iter()
        .find(|(phrases, _)| phrases.contains(&normalized.as_str()))
        .map(|(_, reply)| *reply)
}
