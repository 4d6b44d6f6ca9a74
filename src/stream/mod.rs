//! Wire events for streamed generation.
//!
//! # Event Types
//!
//! | Variant             | `type`          | SSE `event:` |
//! |---------------------|-----------------|--------------|
//! | `TextDelta`         | `ai_text`       | `message`    |
//! | `ToolCallRequested` | `tool_request`  | `message`    |
//! | `ToolCallCompleted` | `tool_executed` | `message`    |
//! | `Completed`         | `done`          | `done`       |
//! | `Error`             | `error`         | `error`      |
//!
//! Concatenating every `ai_text` payload in order gives the full model reply.

pub mod translator;

pub use translator::{StreamCompletion, TranslatorConfig, spawn_translator};

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

/// Keep-alive comment interval for SSE responses.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// One event of a generation stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    /// Incremental model text.
    #[serde(rename = "ai_text")]
    TextDelta {
        #[serde(rename = "d")]
        text: String,
    },

    /// The model asked for a tool; `arguments` is the complete JSON string.
    #[serde(rename = "tool_request")]
    ToolCallRequested {
        id: String,
        name: String,
        arguments: String,
    },

    /// A requested tool ran.
    #[serde(rename = "tool_executed")]
    ToolCallCompleted { id: String, result: String },

    /// Generation finished and its output is persisted.
    #[serde(rename = "done")]
    Completed,

    /// Generation failed. Always the last event.
    #[serde(rename = "error")]
    Error { message: String },
}

impl StreamEvent {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error { .. })
    }

    /// SSE `event:` name.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Completed => "done",
            Self::Error { .. } => "error",
            Self::TextDelta { .. } | Self::ToolCallRequested { .. } | Self::ToolCallCompleted { .. } => {
                "message"
            }
        }
    }

    /// JSON payload for the SSE `data:` line.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({ "type": "error", "message": e.to_string() }).to_string()
        })
    }
}

/// Wrap a stream of [`StreamEvent`]s into an SSE response with keep-alive.
pub fn build_sse_response<S>(stream: S) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send>
where
    S: Stream<Item = StreamEvent> + Send + 'static,
{
    let stream = stream.map(|event| {
        Ok(Event::default()
            .event(event.event_name())
            .data(event.to_json()))
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}
