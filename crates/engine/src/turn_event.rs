//! Turn-level streaming events.
//!
//! `TurnEvent` is what the transport layer forwards to the client over SSE
//! or WebSocket. The engine itself never touches HTTP; it writes these to a
//! channel and the consumer frames them however it likes.

use serde::{Deserialize, Serialize};

/// Events emitted during a single turn.
///
/// - `token`  — partial narration text from the model
/// - `event`  — opaque notification (e.g. a tool call being dispatched)
/// - `error`  — the turn failed; `done` still follows
/// - `done`   — the turn is over
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Partial narration text.
    Token { text: String },

    /// An opaque, client-optional notification.
    Event {
        kind: String,
        payload: serde_json::Value,
    },

    /// The turn failed with a user-visible error.
    Error { message: String },

    /// Terminal event for every turn, successful or not.
    Done,
}

impl TurnEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Token { .. } => "token",
            Self::Event { .. } => "event",
            Self::Error { .. } => "error",
            Self::Done => "done",
        }
    }
}
