//! Model clients bound to generation sessions.
//!
//! A client turns one user prompt plus the session memory into a stream of
//! [`ModelEvent`]s. The user message is added to memory before the call and
//! the assistant reply once the model completes.

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};

use super::{AgentClient, DriverEvent, LlmDriver, LlmRequest, Message};
use crate::error::{Error, Result};
use crate::session::MessageWindowMemory;

/// Raw model callbacks, before translation into wire events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEvent {
    /// A fragment of assistant text.
    PartialText(String),
    /// A fragment of a tool call request.
    PartialToolCall {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments_delta: String,
    },
    /// A tool call ran; `result` is what the model sees.
    ToolExecuted {
        id: String,
        name: String,
        arguments: String,
        result: String,
    },
    /// The model finished its reply.
    Completed,
    /// The model or the network failed. Terminal.
    Failed(String),
}

/// Boxed model event stream.
pub type ModelEventStream = Pin<Box<dyn Stream<Item = ModelEvent> + Send>>;

/// Plain streaming completion, no tools.
#[derive(Debug, Clone)]
pub struct DirectClient {
    driver: Arc<dyn LlmDriver>,
    system_prompt: &'static str,
}

impl DirectClient {
    pub fn new(driver: Arc<dyn LlmDriver>, system_prompt: &'static str) -> Self {
        Self {
            driver,
            system_prompt,
        }
    }

    /// Stream one reply to `prompt`.
    pub fn stream(&self, memory: MessageWindowMemory, prompt: String) -> ModelEventStream {
        let driver = Arc::clone(&self.driver);
        let system_prompt = self.system_prompt;

        Box::pin(async_stream::stream! {
            memory.add(Message::user(prompt)).await;

            let mut messages = vec![Message::system(system_prompt)];
            messages.extend(memory.messages().await);

            tracing::debug!(
                app_id = %memory.app_id(),
                message_count = messages.len(),
                "Starting direct completion"
            );

            let driver_stream = match driver.stream(LlmRequest { messages, tools: Vec::new() }).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(app_id = %memory.app_id(), error = %e, "Failed to create driver stream");
                    yield ModelEvent::Failed(e.to_string());
                    return;
                }
            };

            let mut reply = String::new();
            futures::pin_mut!(driver_stream);
            while let Some(result) = driver_stream.next().await {
                match result {
                    Ok(DriverEvent::TextDelta { text }) => {
                        reply.push_str(&text);
                        yield ModelEvent::PartialText(text);
                    }
                    Ok(DriverEvent::Done) => {
                        memory.add(Message::assistant(reply)).await;
                        yield ModelEvent::Completed;
                        return;
                    }
                    // No tools were offered; stray tool events are ignored.
                    Ok(DriverEvent::ToolCallDelta { .. } | DriverEvent::ToolCallsFinished) => {}
                    Err(e) => {
                        tracing::error!(app_id = %memory.app_id(), error = %e, "Model stream failed");
                        yield ModelEvent::Failed(e.to_string());
                        return;
                    }
                }
            }
        })
    }
}

/// The model client a session is bound to.
#[derive(Debug, Clone)]
pub enum ModelClient {
    Direct(DirectClient),
    Agent(AgentClient),
}

impl ModelClient {
    /// Start a streamed reply.
    ///
    /// `workspace` is the sandbox root for tool-calling clients and is
    /// ignored by direct ones.
    pub fn stream(
        &self,
        memory: MessageWindowMemory,
        prompt: String,
        workspace: Option<PathBuf>,
    ) -> Result<ModelEventStream> {
        match self {
            Self::Direct(client) => Ok(client.stream(memory, prompt)),
            Self::Agent(client) => {
                let workspace = workspace.ok_or_else(|| {
                    Error::Configuration("tool-calling generation needs a workspace".to_string())
                })?;
                Ok(client.stream(memory, prompt, workspace))
            }
        }
    }

    /// Run a reply to completion and return the full text.
    pub async fn complete(
        &self,
        memory: MessageWindowMemory,
        prompt: String,
        workspace: Option<PathBuf>,
    ) -> Result<String> {
        let mut stream = self.stream(memory, prompt, workspace)?;
        let mut text = String::new();

        while let Some(event) = stream.next().await {
            match event {
                ModelEvent::PartialText(t) => text.push_str(&t),
                ModelEvent::Completed => return Ok(text),
                ModelEvent::Failed(message) => return Err(Error::Model(message)),
                ModelEvent::PartialToolCall { .. } | ModelEvent::ToolExecuted { .. } => {}
            }
        }
        Err(Error::Model("model stream ended unexpectedly".to_string()))
    }
}
