//! File-backed stores under one data directory.
//!
//! - `apps.json`: array of [`AppRecord`], rewritten atomically on update
//! - `chat_history.jsonl`: one [`ChatTurn`] per line, append-only
//!
//! Both files are read once at open and kept in memory afterwards.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use crate::codegen::{AppId, Variant};
use crate::store::{AppRecord, AppStore, ChatHistoryStore, ChatTurn, last_turns, next_app_id};

const APPS_FILE: &str = "apps.json";
const HISTORY_FILE: &str = "chat_history.jsonl";

#[derive(Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
    apps: RwLock<BTreeMap<AppId, AppRecord>>,
    turns: RwLock<Vec<ChatTurn>>,
    /// Serializes appends to the history file.
    history_writer: Mutex<()>,
}

impl JsonFileStore {
    /// Open (or create) the store in `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("cannot create data directory {}", dir.display()))?;

        let apps = load_apps(&dir.join(APPS_FILE)).await?;
        let turns = load_turns(&dir.join(HISTORY_FILE)).await?;

        tracing::info!(
            data_dir = %dir.display(),
            app_count = apps.len(),
            turn_count = turns.len(),
            "Opened JSON file store"
        );

        Ok(Self {
            dir,
            apps: RwLock::new(apps),
            turns: RwLock::new(turns),
            history_writer: Mutex::new(()),
        })
    }

    /// Insert or replace an app and persist the app list.
    pub async fn upsert_app(&self, app: AppRecord) -> Result<()> {
        let mut apps = self.apps.write().await;
        apps.insert(app.id, app);
        self.write_apps(&apps).await
    }

    async fn write_apps(&self, apps: &BTreeMap<AppId, AppRecord>) -> Result<()> {
        let path = self.dir.join(APPS_FILE);
        let tmp = self.dir.join(format!("{APPS_FILE}.tmp"));
        let json = serde_json::to_vec_pretty(&apps.values().collect::<Vec<_>>())?;

        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("cannot write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("cannot replace {}", path.display()))?;
        Ok(())
    }
}

async fn load_apps(path: &Path) -> Result<BTreeMap<AppId, AppRecord>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e).with_context(|| format!("cannot read {}", path.display())),
    };
    let apps: Vec<AppRecord> =
        serde_json::from_slice(&bytes).with_context(|| format!("invalid {}", path.display()))?;
    Ok(apps.into_iter().map(|a| (a.id, a)).collect())
}

async fn load_turns(path: &Path) -> Result<Vec<ChatTurn>> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("cannot read {}", path.display())),
    };

    let mut turns = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(turn) => turns.push(turn),
            // A crash mid-append leaves a torn last line.
            Err(e) => tracing::warn!(path = %path.display(), line = line_no + 1, error = %e, "Skipping unreadable chat turn"),
        }
    }
    Ok(turns)
}

#[async_trait]
impl ChatHistoryStore for JsonFileStore {
    async fn load_last(&self, app_id: AppId, limit: usize) -> Result<Vec<ChatTurn>> {
        Ok(last_turns(self.turns.read().await.iter(), app_id, limit))
    }

    async fn append(&self, turn: ChatTurn) -> Result<()> {
        let mut line = serde_json::to_vec(&turn)?;
        line.push(b'\n');

        let _guard = self.history_writer.lock().await;
        let path = self.dir.join(HISTORY_FILE);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("cannot open {}", path.display()))?;
        file.write_all(&line).await?;
        file.flush().await?;

        self.turns.write().await.push(turn);
        Ok(())
    }
}

#[async_trait]
impl AppStore for JsonFileStore {
    async fn get_app(&self, app_id: AppId) -> Result<Option<AppRecord>> {
        Ok(self.apps.read().await.get(&app_id).cloned())
    }

    async fn create_app(&self, owner_id: &str, variant: Variant) -> Result<AppRecord> {
        let mut apps = self.apps.write().await;
        let app = AppRecord::new(next_app_id(apps.keys()), owner_id, variant);
        apps.insert(app.id, app.clone());
        self.write_apps(&apps).await?;
        tracing::info!(app_id = %app.id, owner = %owner_id, variant = %variant, "App created");
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
        self.write_apps(&apps).await
    }
}
