//! Bounded conversation memory.
//!
//! Messages live in a [`ChatMemoryStore`] keyed by app id, so two session
//! objects for the same app share one conversation. A
//! [`MessageWindowMemory`] is a view onto one app's entry that keeps at most
//! `max_messages`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::codegen::AppId;
use crate::llm::{Message, MessageRole};

/// Process-wide conversation store.
#[derive(Debug, Default)]
pub struct ChatMemoryStore {
    conversations: RwLock<HashMap<AppId, Vec<Message>>>,
}

impl ChatMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn messages(&self, app_id: AppId) -> Vec<Message> {
        self.conversations
            .read()
            .await
            .get(&app_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn clear(&self, app_id: AppId) {
        self.conversations.write().await.remove(&app_id);
    }

    async fn push(&self, app_id: AppId, message: Message, max_messages: usize) {
        let mut guard = self.conversations.write().await;
        let conversation = guard.entry(app_id).or_default();
        conversation.push(message);
        trim_window(conversation, max_messages);
    }
}

/// Drop the oldest messages beyond `max`, then any tool results whose
/// requesting assistant turn was dropped.
fn trim_window(messages: &mut Vec<Message>, max: usize) {
    if messages.len() > max {
        messages.drain(..messages.len() - max);
    }
    let orphans = messages
        .iter()
        .take_while(|m| m.role == MessageRole::Tool)
        .count();
    messages.drain(..orphans);
}

/// Window of at most `max_messages` over one app's conversation.
#[derive(Debug, Clone)]
pub struct MessageWindowMemory {
    app_id: AppId,
    max_messages: usize,
    store: Arc<ChatMemoryStore>,
}

impl MessageWindowMemory {
    pub fn new(app_id: AppId, max_messages: usize, store: Arc<ChatMemoryStore>) -> Self {
        Self {
            app_id,
            max_messages,
            store,
        }
    }

    #[must_use]
    pub fn app_id(&self) -> AppId {
        self.app_id
    }

    #[must_use]
    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    pub async fn add(&self, message: Message) {
        self.store.push(self.app_id, message, self.max_messages).await;
    }

    /// Current window, oldest first.
    pub async fn messages(&self) -> Vec<Message> {
        let mut messages = self.store.messages(self.app_id).await;
        // Another variant's window may be wider.
        trim_window(&mut messages, self.max_messages);
        messages
    }

    pub async fn clear(&self) {
        self.store.clear(self.app_id).await;
    }
}
