//! Model-chosen variant for apps created from a prompt alone.

use std::sync::Arc;

use futures::StreamExt;

use crate::codegen::{AppId, Variant, prompts};
use crate::error::{Error, Result};
use crate::llm::{DirectClient, LlmDriver, ModelEvent};
use crate::session::{ChatMemoryStore, MessageWindowMemory};

/// Picks a generation variant for a prompt with one short completion.
#[derive(Debug, Clone)]
pub struct VariantRouter {
    client: DirectClient,
}

impl VariantRouter {
    pub fn new(driver: Arc<dyn LlmDriver>) -> Self {
        Self {
            client: DirectClient::new(driver, prompts::VARIANT_ROUTING),
        }
    }

    /// Ask the model which variant fits `prompt`.
    ///
    /// A model failure or a reply naming no known variant is [`Error::Model`].
    #[tracing::instrument(skip(self, prompt), fields(prompt_length = prompt.len()))]
    pub async fn route(&self, prompt: &str) -> Result<Variant> {
        // Routing is stateless; the window only holds this exchange.
        let memory = MessageWindowMemory::new(AppId(0), 2, Arc::new(ChatMemoryStore::new()));
        let mut events = self.client.stream(memory, prompt.to_string());

        let mut reply = String::new();
        while let Some(event) = events.next().await {
            match event {
                ModelEvent::PartialText(text) => reply.push_str(&text),
                ModelEvent::Completed => {
                    let variant = parse_variant(&reply)
                        .ok_or_else(|| Error::Model(format!("model chose no known variant: {:?}", reply.trim())))?;
                    tracing::info!(variant = %variant, "Variant routed");
                    return Ok(variant);
                }
                ModelEvent::Failed(message) => return Err(Error::Model(message)),
                ModelEvent::PartialToolCall { .. } | ModelEvent::ToolExecuted { .. } => {}
            }
        }
        Err(Error::Model("routing reply ended unexpectedly".to_string()))
    }
}

/// The variant a reply names: the whole reply, else the earliest mention.
fn parse_variant(reply: &str) -> Option<Variant> {
    let cleaned = reply
        .trim()
        .trim_matches(|c: char| c == '`' || c == '"' || c == '\'' || c == '.' || c.is_whitespace())
        .to_ascii_lowercase();
    if let Ok(variant) = cleaned.parse() {
        return Some(variant);
    }
    Variant::ALL
        .into_iter()
        .filter_map(|v| cleaned.find(v.as_str()).map(|pos| (pos, v)))
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, v)| v)
}
