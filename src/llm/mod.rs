//! LLM driver traits and implementations.
//!
//! # Overview
//!
//! The [`LlmDriver`] trait is the one seam to the model provider: it sends a
//! conversation and streams back [`DriverEvent`]s. Everything above it is
//! provider-agnostic.
//!
//! - [`ChatCompletionsDriver`]: OpenAI-compatible `/v1/chat/completions` streaming
//! - [`Provider`]: URL and auth differences between providers
//! - [`ModelClient`]: what a generation session binds, either a direct
//!   completion client or a tool-calling agent loop
//!
//! # Example
//!
//! ```rust,ignore
//! use axum_codegen_deploy::llm::{ChatCompletionsDriver, LlmSettings};
//!
//! let settings = LlmSettings::new("https://api.openai.com", "gpt-4o-mini");
//! let driver = ChatCompletionsDriver::new(settings);
//! ```

pub mod agent;
pub mod chat_completions;
pub mod client;
pub mod provider;

pub use agent::AgentClient;
pub use chat_completions::ChatCompletionsDriver;
pub use client::{DirectClient, ModelClient, ModelEvent, ModelEventStream};
pub use provider::Provider;

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

/// LLM connection and model settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    /// Base URL for the LLM API (e.g., `https://api.openai.com`).
    pub base_url: String,
    /// Optional API key for authentication.
    pub api_key: Option<String>,
    /// Model identifier.
    pub model: String,
    /// Provider type, detected from `base_url` unless Azure settings are given.
    pub provider: Provider,
    /// Whether to request parallel tool calls. Omitted from the request when `None`.
    pub parallel_tool_calls: Option<bool>,
}

impl LlmSettings {
    /// Settings for an OpenAI-compatible endpoint with no key.
    #[must_use]
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            provider: Provider::detect_from_url(&base_url),
            base_url,
            api_key: None,
            model: model.into(),
            parallel_tool_calls: None,
        }
    }

    /// Same endpoint and credentials, different model.
    #[must_use]
    pub fn with_model(&self, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..self.clone()
        }
    }
}

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in a conversation, in Chat Completions shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    /// Text content. `None` only for assistant messages that carry tool calls.
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl Message {
    fn text(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(MessageRole::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::text(MessageRole::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(MessageRole::Assistant, content)
    }

    /// Assistant turn that requested tool calls.
    #[must_use]
    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.filter(|c| !c.is_empty()),
            tool_call_id: None,
            tool_calls: Some(tool_calls),
        }
    }

    /// Result of one tool call.
    #[must_use]
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(content.into()),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: None,
        }
    }
}

/// A tool call made by the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    /// Always `"function"`.
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: ToolCallFunction,
}

impl ToolCall {
    #[must_use]
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            call_type: "function".to_string(),
            function: ToolCallFunction {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// Function details in a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    /// Arguments as a JSON string.
    pub arguments: String,
}

/// Request to an LLM driver.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Conversation messages, system prompt first.
    pub messages: Vec<Message>,
    /// Available tools in `OpenAI` function schema format.
    pub tools: Vec<serde_json::Value>,
}

/// Events streamed back by a driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    /// Incremental assistant text.
    TextDelta { text: String },
    /// Incremental tool call fragment. `id` and `name` usually arrive once.
    ToolCallDelta {
        call_index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments_delta: Option<String>,
    },
    /// The model stopped to have tools executed.
    ToolCallsFinished,
    /// End of the response.
    Done,
}

/// Boxed driver event stream.
pub type DriverStream = Pin<Box<dyn Stream<Item = anyhow::Result<DriverEvent>> + Send>>;

/// Trait for LLM streaming drivers.
#[async_trait::async_trait]
pub trait LlmDriver: Send + Sync + std::fmt::Debug {
    /// Stream a response from the LLM.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent or is rejected. Errors
    /// after the first byte arrive as stream items.
    async fn stream(&self, req: LlmRequest) -> anyhow::Result<DriverStream>;
}
