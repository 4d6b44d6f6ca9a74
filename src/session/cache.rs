//! Per-(app, variant) session cache.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use super::memory::{ChatMemoryStore, MessageWindowMemory};
use crate::codegen::{AppId, Variant, prompts};
use crate::error::Result;
use crate::llm::agent::DEFAULT_MAX_TOOL_ITERATIONS;
use crate::llm::{AgentClient, DirectClient, LlmDriver, Message, ModelClient, ModelEventStream};
use crate::store::{ChatHistoryStore, TurnKind};

/// Default maximum number of cached sessions.
pub const DEFAULT_MAX_ENTRIES: usize = 1000;
/// Default idle time after which a session is dropped.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
/// Default age after which a session is dropped regardless of use.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30 * 60);

/// Eviction policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub max_entries: usize,
    pub idle_timeout: Duration,
    pub max_age: Duration,
    pub max_tool_iterations: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_age: DEFAULT_MAX_AGE,
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
        }
    }
}

/// Drivers the cache binds sessions to.
#[derive(Debug, Clone)]
pub struct ModelDrivers {
    /// Used for single-page and multi-file generation.
    pub chat: Arc<dyn LlmDriver>,
    /// Used for the project agent.
    pub reasoning: Arc<dyn LlmDriver>,
}

impl ModelDrivers {
    /// Use one driver for every variant.
    pub fn single(driver: Arc<dyn LlmDriver>) -> Self {
        Self {
            chat: Arc::clone(&driver),
            reasoning: driver,
        }
    }
}

/// A model client plus its conversation window for one app and variant.
#[derive(Debug)]
pub struct GenerationSession {
    app_id: AppId,
    variant: Variant,
    memory: MessageWindowMemory,
    client: ModelClient,
}

impl GenerationSession {
    #[must_use]
    pub fn app_id(&self) -> AppId {
        self.app_id
    }

    #[must_use]
    pub fn variant(&self) -> Variant {
        self.variant
    }

    #[must_use]
    pub fn memory(&self) -> &MessageWindowMemory {
        &self.memory
    }

    /// Stream a reply to `prompt`. `workspace` is required for tool-calling
    /// variants.
    pub fn stream(&self, prompt: String, workspace: Option<PathBuf>) -> Result<ModelEventStream> {
        self.client.stream(self.memory.clone(), prompt, workspace)
    }

    /// Run a reply to completion.
    pub async fn complete(&self, prompt: String) -> Result<String> {
        self.client.complete(self.memory.clone(), prompt, None).await
    }
}

#[derive(Debug)]
struct Entry {
    session: Arc<GenerationSession>,
    created_at: Instant,
    last_access: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant, settings: &SessionSettings) -> bool {
        now.duration_since(self.last_access) >= settings.idle_timeout
            || now.duration_since(self.created_at) >= settings.max_age
    }
}

/// Bounded cache of generation sessions.
///
/// Sessions are handed out as `Arc`s; eviction only removes the cache's
/// reference, so a stream holding a session is never interrupted.
#[derive(Debug)]
pub struct SessionCache {
    settings: SessionSettings,
    drivers: ModelDrivers,
    memory_store: Arc<ChatMemoryStore>,
    history: Arc<dyn ChatHistoryStore>,
    entries: RwLock<HashMap<(AppId, Variant), Entry>>,
}

impl SessionCache {
    pub fn new(
        settings: SessionSettings,
        drivers: ModelDrivers,
        history: Arc<dyn ChatHistoryStore>,
        memory_store: Arc<ChatMemoryStore>,
    ) -> Self {
        Self {
            settings,
            drivers,
            memory_store,
            history,
            entries: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Cached session for `(app_id, variant)`, creating one if missing or
    /// expired.
    ///
    /// Creation happens outside the lock; two concurrent misses may both
    /// build a session and the last insert wins. Both share the app's memory.
    #[tracing::instrument(skip(self), fields(app_id = %app_id, variant = %variant))]
    pub async fn get_or_create(&self, app_id: AppId, variant: Variant) -> Result<Arc<GenerationSession>> {
        let key = (app_id, variant);
        {
            let now = Instant::now();
            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.get_mut(&key) {
                if !entry.is_expired(now, &self.settings) {
                    entry.last_access = now;
                    return Ok(Arc::clone(&entry.session));
                }
            }
        }

        let session = Arc::new(self.build(app_id, variant).await?);

        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            Entry {
                session: Arc::clone(&session),
                created_at: now,
                last_access: now,
            },
        );
        self.evict_locked(&mut entries, now);

        Ok(session)
    }

    /// Drop expired sessions now. Returns how many were removed.
    pub async fn evict_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        self.evict_locked(&mut entries, Instant::now())
    }

    /// Remove one session from the cache.
    pub async fn invalidate(&self, app_id: AppId, variant: Variant) -> bool {
        self.entries.write().await.remove(&(app_id, variant)).is_some()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn evict_locked(&self, entries: &mut HashMap<(AppId, Variant), Entry>, now: Instant) -> usize {
        let before = entries.len();
        entries.retain(|(app_id, variant), entry| {
            let keep = !entry.is_expired(now, &self.settings);
            if !keep {
                tracing::debug!(app_id = %app_id, variant = %variant, "Evicted expired session");
            }
            keep
        });

        while entries.len() > self.settings.max_entries {
            let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| *k)
            else {
                break;
            };
            entries.remove(&oldest);
            tracing::debug!(app_id = %oldest.0, variant = %oldest.1, "Evicted least recently used session");
        }

        before - entries.len()
    }

    async fn build(&self, app_id: AppId, variant: Variant) -> Result<GenerationSession> {
        let memory = MessageWindowMemory::new(
            app_id,
            variant.memory_window(),
            Arc::clone(&self.memory_store),
        );

        let turns = self.history.load_last(app_id, variant.history_turns()).await?;
        memory.clear().await;
        let mut loaded = 0usize;
        for turn in turns {
            let message = match turn.kind {
                TurnKind::User => Message::user(turn.message),
                TurnKind::Ai => Message::assistant(turn.message),
                TurnKind::Error => continue,
            };
            memory.add(message).await;
            loaded += 1;
        }

        let system_prompt = prompts::system_prompt(variant);
        let client = match variant {
            Variant::SinglePage | Variant::MultiFile => {
                ModelClient::Direct(DirectClient::new(Arc::clone(&self.drivers.chat), system_prompt))
            }
            Variant::BuildableProject => ModelClient::Agent(
                AgentClient::new(Arc::clone(&self.drivers.reasoning), system_prompt)
                    .with_max_iterations(self.settings.max_tool_iterations),
            ),
        };

        tracing::info!(
            app_id = %app_id,
            variant = %variant,
            history_turns = loaded,
            window = variant.memory_window(),
            "Created generation session"
        );

        Ok(GenerationSession {
            app_id,
            variant,
            memory,
            client,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{DriverStream, LlmRequest};
    use crate::store::ChatTurn;
    use crate::store::providers::InMemoryStore;

    #[derive(Debug)]
    struct Silent;

    #[async_trait::async_trait]
    impl LlmDriver for Silent {
        async fn stream(&self, _req: LlmRequest) -> anyhow::Result<DriverStream> {
            Ok(Box::pin(futures::stream::empty()))
        }
    }

    fn cache_with(settings: SessionSettings, history: Arc<InMemoryStore>) -> SessionCache {
        SessionCache::new(
            settings,
            ModelDrivers::single(Arc::new(Silent)),
            history,
            Arc::new(ChatMemoryStore::new()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_refreshes_idle_timer() {
        let cache = cache_with(SessionSettings::default(), Arc::new(InMemoryStore::new()));
        let first = cache.get_or_create(AppId(1), Variant::SinglePage).await.unwrap();

        tokio::time::advance(Duration::from_secs(6 * 60)).await;
        let second = cache.get_or_create(AppId(1), Variant::SinglePage).await.unwrap();
        tokio::time::advance(Duration::from_secs(6 * 60)).await;
        let third = cache.get_or_create(AppId(1), Variant::SinglePage).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &third));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_and_age_expiry() {
        let cache = cache_with(SessionSettings::default(), Arc::new(InMemoryStore::new()));
        let first = cache.get_or_create(AppId(1), Variant::MultiFile).await.unwrap();

        tokio::time::advance(DEFAULT_IDLE_TIMEOUT).await;
        let second = cache.get_or_create(AppId(1), Variant::MultiFile).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));

        // Touched every 5 minutes, still dropped at 30.
        for _ in 0..6 {
            tokio::time::advance(Duration::from_secs(5 * 60)).await;
            let _ = cache.get_or_create(AppId(1), Variant::MultiFile).await.unwrap();
        }
        let after_max_age = cache.get_or_create(AppId(1), Variant::MultiFile).await.unwrap();
        assert!(!Arc::ptr_eq(&second, &after_max_age));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_least_recently_used() {
        let settings = SessionSettings {
            max_entries: 2,
            ..SessionSettings::default()
        };
        let cache = cache_with(settings, Arc::new(InMemoryStore::new()));

        let one = cache.get_or_create(AppId(1), Variant::SinglePage).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.get_or_create(AppId(2), Variant::SinglePage).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.get_or_create(AppId(3), Variant::SinglePage).await.unwrap();

        assert_eq!(cache.len().await, 2);
        let again = cache.get_or_create(AppId(1), Variant::SinglePage).await.unwrap();
        assert!(!Arc::ptr_eq(&one, &again));
        // The evicted handle is still a working session.
        assert_eq!(one.app_id(), AppId(1));
    }

    #[tokio::test]
    async fn test_history_loaded_into_window_once() {
        let history = Arc::new(InMemoryStore::new());
        for i in 0..30 {
            let kind = if i % 2 == 0 { TurnKind::User } else { TurnKind::Ai };
            history
                .append(ChatTurn::new(AppId(4), "u", kind, format!("t{i}")))
                .await
                .unwrap();
        }
        history
            .append(ChatTurn::new(AppId(4), "u", TurnKind::Error, "boom"))
            .await
            .unwrap();

        let cache = cache_with(SessionSettings::default(), Arc::clone(&history));
        let session = cache.get_or_create(AppId(4), Variant::SinglePage).await.unwrap();
        // Last 20 turns include the error turn, which is not replayed.
        assert_eq!(session.memory().messages().await.len(), 19);

        // Rebuilding reloads instead of appending twice.
        cache.invalidate(AppId(4), Variant::SinglePage).await;
        let session = cache.get_or_create(AppId(4), Variant::SinglePage).await.unwrap();
        let messages = session.memory().messages().await;
        assert_eq!(messages.len(), 19);
        assert_eq!(messages.last().unwrap().content.as_deref(), Some("t29"));
    }

    #[tokio::test]
    async fn test_project_session_gets_agent_client() {
        let cache = cache_with(SessionSettings::default(), Arc::new(InMemoryStore::new()));
        let session = cache
            .get_or_create(AppId(5), Variant::BuildableProject)
            .await
            .unwrap();
        assert_eq!(session.memory().max_messages(), 10);
        assert!(session.stream("x".into(), None).is_err());
    }
}
