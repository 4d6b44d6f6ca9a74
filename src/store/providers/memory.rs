//! In-memory stores, for tests and throwaway servers.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::codegen::{AppId, Variant};
use crate::store::{AppRecord, AppStore, ChatHistoryStore, ChatTurn, last_turns, next_app_id};

/// Both stores in one struct, behind `tokio` locks.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    apps: RwLock<HashMap<AppId, AppRecord>>,
    turns: RwLock<Vec<ChatTurn>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with apps.
    #[must_use]
    pub fn with_apps(apps: impl IntoIterator<Item = AppRecord>) -> Self {
        Self {
            apps: RwLock::new(apps.into_iter().map(|a| (a.id, a)).collect()),
            turns: RwLock::default(),
        }
    }

    pub async fn insert_app(&self, app: AppRecord) {
        self.apps.write().await.insert(app.id, app);
    }

    /// Every turn of an app, oldest first.
    pub async fn turns(&self, app_id: AppId) -> Vec<ChatTurn> {
        last_turns(self.turns.read().await.iter(), app_id, usize::MAX)
    }
}

#[async_trait]
impl ChatHistoryStore for InMemoryStore {
    async fn load_last(&self, app_id: AppId, limit: usize) -> Result<Vec<ChatTurn>> {
        Ok(last_turns(self.turns.read().await.iter(), app_id, limit))
    }

    async fn append(&self, turn: ChatTurn) -> Result<()> {
        self.turns.write().await.push(turn);
        Ok(())
    }
}

#[async_trait]
impl AppStore for InMemoryStore {
    async fn get_app(&self, app_id: AppId) -> Result<Option<AppRecord>> {
        Ok(self.apps.read().await.get(&app_id).cloned())
    }

    async fn create_app(&self, owner_id: &str, variant: Variant) -> Result<AppRecord> {
        let mut apps = self.apps.write().await;
        let app = AppRecord::new(next_app_id(apps.keys()), owner_id, variant);
        apps.insert(app.id, app.clone());
        Ok(app)
    }

    async fn record_deployment(
        &self,
        app_id: AppId,
        deploy_key: &str,
        deployed_at: DateTime<Utc>,
        source_directory: &Path,
    ) -> Result<()> {
        let mut apps = self.apps.write().await;
        let app = apps
            .get_mut(&app_id)
            .ok_or_else(|| anyhow::anyhow!("app {app_id} does not exist"))?;
        app.deploy_key = Some(deploy_key.to_string());
        app.deployed_at = Some(deployed_at);
        app.source_directory = Some(source_directory.to_path_buf());
        Ok(())
    }
}
