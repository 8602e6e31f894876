//! Chat endpoint handler
//!
//! POST /chat runs one message through the dispatcher. A completed request
//! returns 200; a deferred one returns 202 with `Retry-After`, since the
//! request was accepted and the caller should try again later.

use crate::cache::StateFacts;
use crate::dispatch::DispatchOutcome;
use crate::envelope::{InboundMessage, Priority};
use crate::handlers::AppState;
use crate::middleware::RequestId;
use axum::{
    Extension, Json,
    extract::State,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Deserializer, Serialize};

/// Maximum allowed message length in characters (100K chars)
const MAX_MESSAGE_LENGTH: usize = 100_000;

/// Chat request from a client
///
/// Validation is enforced during deserialization: invalid instances cannot exist.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    message: String,
    sender: String,
    medium: String,
    priority: Priority,
    context: Option<StateFacts>,
}

impl ChatRequest {
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Convert into the dispatcher's inbound message
    pub fn into_message(self, received_at: i64) -> InboundMessage {
        InboundMessage::new(self.message, self.sender, self.medium, received_at)
            .with_priority(self.priority)
            .with_state(self.context.unwrap_or_default())
    }
}

impl<'de> Deserialize<'de> for ChatRequest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawChatRequest {
            message: String,
            #[serde(default = "default_sender")]
            sender: String,
            #[serde(default = "default_medium")]
            medium: String,
            #[serde(default)]
            priority: Priority,
            #[serde(default)]
            context: Option<StateFacts>,
        }

        let raw = RawChatRequest::deserialize(deserializer)?;

        if raw.message.trim().is_empty() {
            return Err(serde::de::Error::custom(
                "message cannot be empty or contain only whitespace",
            ));
        }

        let char_count = raw.message.chars().count();
        if char_count > MAX_MESSAGE_LENGTH {
            return Err(serde::de::Error::custom(format!(
                "message exceeds maximum length of {} characters (got {})",
                MAX_MESSAGE_LENGTH, char_count
            )));
        }

        if raw.sender.trim().is_empty() {
            return Err(serde::de::Error::custom("sender cannot be empty"));
        }

        Ok(ChatRequest {
            message: raw.message,
            sender: raw.sender,
            medium: raw.medium,
            priority: raw.priority,
            context: raw.context.filter(|facts| !facts.is_empty()),
        })
    }
}

fn default_sender() -> String {
    "anonymous".to_string()
}

fn default_medium() -> String {
    "http".to_string()
}

/// Chat handler
///
/// Never fails once the body has parsed: provider trouble ends in a
/// deferred outcome, not an error status.
pub async fn handler(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(request): Json<ChatRequest>,
) -> Response {
    tracing::debug!(
        request_id = %request_id,
        sender = request.sender(),
        priority = request.priority().as_str(),
        message_length = request.message().chars().count(),
        "Chat request received"
    );

    let message = request.into_message(state.clock().now_epoch());
    let outcome = state.dispatcher().dispatch(message).await;

    tracing::debug!(
        request_id = %request_id,
        envelope_id = %outcome.envelope().id(),
        completed = outcome.is_completed(),
        "Chat request dispatched"
    );

    into_http(outcome)
}

fn into_http(outcome: DispatchOutcome) -> Response {
    match outcome.retry_after_seconds() {
        None => (StatusCode::OK, Json(outcome)).into_response(),
        Some(seconds) => {
            let mut response = (StatusCode::ACCEPTED, Json(outcome)).into_response();
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
            response
        }
    }
}
