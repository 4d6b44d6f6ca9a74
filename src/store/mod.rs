//! Collaborator stores consumed by the pipeline.
//!
//! The generation core only needs two things from the outside world: the
//! persisted chat history of an app and a little app metadata (owner,
//! variant, deploy key). Both sit behind async traits; [`providers`] has an
//! in-memory and a JSON-file implementation.

pub mod providers;

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codegen::{AppId, Variant};

/// Who produced a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnKind {
    User,
    Ai,
    Error,
}

/// One persisted chat turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub app_id: AppId,
    pub user_id: String,
    pub kind: TurnKind,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl ChatTurn {
    pub fn new(app_id: AppId, user_id: impl Into<String>, kind: TurnKind, message: impl Into<String>) -> Self {
        Self {
            app_id,
            user_id: user_id.into(),
            kind,
            message: message.into(),
            created_at: Utc::now(),
        }
    }
}

/// App metadata the pipeline reads and updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRecord {
    pub id: AppId,
    pub owner_id: String,
    pub variant: Variant,
    #[serde(default)]
    pub deploy_key: Option<String>,
    #[serde(default)]
    pub deployed_at: Option<DateTime<Utc>>,
    /// Artifact directory the last deploy was published from.
    #[serde(default)]
    pub source_directory: Option<PathBuf>,
}

impl AppRecord {
    pub fn new(id: AppId, owner_id: impl Into<String>, variant: Variant) -> Self {
        Self {
            id,
            owner_id: owner_id.into(),
            variant,
            deploy_key: None,
            deployed_at: None,
            source_directory: None,
        }
    }
}

/// Persisted conversation per app.
#[async_trait]
pub trait ChatHistoryStore: Send + Sync + std::fmt::Debug {
    /// The `limit` most recent turns of an app, oldest first.
    async fn load_last(&self, app_id: AppId, limit: usize) -> Result<Vec<ChatTurn>>;

    async fn append(&self, turn: ChatTurn) -> Result<()>;
}

/// App metadata lookup and deploy bookkeeping.
#[async_trait]
pub trait AppStore: Send + Sync + std::fmt::Debug {
    async fn get_app(&self, app_id: AppId) -> Result<Option<AppRecord>>;

    /// Register a new app with the next free id.
    async fn create_app(&self, owner_id: &str, variant: Variant) -> Result<AppRecord>;

    /// Persist the deploy key, time and source directory after a successful
    /// deploy.
    async fn record_deployment(
        &self,
        app_id: AppId,
        deploy_key: &str,
        deployed_at: DateTime<Utc>,
        source_directory: &Path,
    ) -> Result<()>;
}

/// Id following the largest one in use.
pub(crate) fn next_app_id<'a>(ids: impl Iterator<Item = &'a AppId>) -> AppId {
    AppId(ids.map(|id| id.0).max().map_or(1, |max| max + 1))
}

/// Keep the last `limit` turns of an app from a full, chronologically
/// ordered list.
pub(crate) fn last_turns<'a>(
    turns: impl DoubleEndedIterator<Item = &'a ChatTurn>,
    app_id: AppId,
    limit: usize,
) -> Vec<ChatTurn> {
    let mut recent: Vec<ChatTurn> = turns
        .rev()
        .filter(|t| t.app_id == app_id)
        .take(limit)
        .cloned()
        .collect();
    recent.reverse();
    recent
}
