//! Build and deploy of saved generations.
//!
//! Deploy always targets the most recent saved directory of an app. The
//! served copy lives at `{deploy_root}/{deploy_key}` and the key, once
//! issued, never changes for that app.

pub mod archive;
pub mod builder;

pub use builder::{BuildSettings, BuildStep, ProjectBuilder};

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use rand::Rng;
use regex::Regex;
use serde::Serialize;
use walkdir::WalkDir;

use crate::codegen::AppId;
use crate::codegen::artifacts::ArtifactStore;
use crate::error::{Error, Result};
use crate::store::{AppRecord, AppStore};

pub const DEPLOY_KEY_LEN: usize = 6;
const DEPLOY_KEY_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

static DEPLOY_KEY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]+$").expect("deploy key pattern compiles"));

/// Outcome of a successful deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentRecord {
    pub app_id: AppId,
    pub deploy_key: String,
    pub deployed_at: DateTime<Utc>,
    pub source_directory: PathBuf,
    pub url: String,
}

/// Zipped sources of an app's latest save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectArchive {
    pub file_name: String,
    pub source_directory: PathBuf,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploySettings {
    pub deploy_root: PathBuf,
    /// Public base URL, the deploy key is appended as a path segment.
    pub deploy_host: String,
}

/// Fresh random deploy key.
pub fn generate_deploy_key() -> String {
    let mut rng = rand::thread_rng();
    (0..DEPLOY_KEY_LEN)
        .map(|_| DEPLOY_KEY_CHARSET[rng.gen_range(0..DEPLOY_KEY_CHARSET.len())] as char)
        .collect()
}

pub fn is_valid_deploy_key(key: &str) -> bool {
    DEPLOY_KEY_PATTERN.is_match(key)
}

#[derive(Debug)]
pub struct DeployService {
    apps: Arc<dyn AppStore>,
    artifacts: Arc<ArtifactStore>,
    builder: ProjectBuilder,
    settings: DeploySettings,
}

impl DeployService {
    pub fn new(
        apps: Arc<dyn AppStore>,
        artifacts: Arc<ArtifactStore>,
        builder: ProjectBuilder,
        settings: DeploySettings,
    ) -> Self {
        Self {
            apps,
            artifacts,
            builder,
            settings,
        }
    }

    pub fn settings(&self) -> &DeploySettings {
        &self.settings
    }

    /// Deploy the latest saved generation of `app_id` on behalf of `user_id`.
    ///
    /// Ownership is checked before anything else. The deploy record is only
    /// persisted after the copy succeeded.
    #[tracing::instrument(skip(self))]
    pub async fn deploy(&self, app_id: AppId, user_id: &str) -> Result<DeploymentRecord> {
        let app = self.owned_app(app_id, user_id).await?;

        let deploy_key = match app.deploy_key.clone() {
            Some(key) if is_valid_deploy_key(&key) => key,
            Some(key) => {
                return Err(Error::Configuration(format!(
                    "stored deploy key {key:?} for app {app_id} is not alphanumeric"
                )));
            }
            None => generate_deploy_key(),
        };

        let source = self.latest_source(&app).await?;

        let deploy_source = if app.variant.requires_build() {
            self.builder.build(&source).await?
        } else {
            source.clone()
        };

        let target = self.settings.deploy_root.join(&deploy_key);
        replace_dir(deploy_source.clone(), target.clone()).await?;

        let deployed_at = Utc::now();
        self.apps
            .record_deployment(app_id, &deploy_key, deployed_at, &source)
            .await?;

        let url = format!("{}/{}", self.settings.deploy_host.trim_end_matches('/'), deploy_key);
        tracing::info!(
            app_id = %app_id,
            deploy_key = %deploy_key,
            source = %deploy_source.display(),
            target = %target.display(),
            url = %url,
            "App deployed"
        );

        Ok(DeploymentRecord {
            app_id,
            deploy_key,
            deployed_at,
            source_directory: source,
            url,
        })
    }

    /// Zip the latest saved generation of `app_id` for download.
    #[tracing::instrument(skip(self))]
    pub async fn download(&self, app_id: AppId, user_id: &str) -> Result<ProjectArchive> {
        let app = self.owned_app(app_id, user_id).await?;
        let source = self.latest_source(&app).await?;

        let dir = source.clone();
        let bytes = tokio::task::spawn_blocking(move || archive::zip_directory(&dir))
            .await
            .map_err(|e| Error::Collaborator(anyhow::anyhow!("zip task failed: {e}")))??;

        tracing::info!(app_id = %app_id, source = %source.display(), size = bytes.len(), "Project archived");
        Ok(ProjectArchive {
            file_name: format!("app-{app_id}.zip"),
            source_directory: source,
            bytes,
        })
    }

    async fn owned_app(&self, app_id: AppId, user_id: &str) -> Result<AppRecord> {
        let app = self
            .apps
            .get_app(app_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("app {app_id}")))?;
        if app.owner_id != user_id {
            return Err(Error::Authorization {
                user_id: user_id.to_string(),
                app_id,
            });
        }
        Ok(app)
    }

    async fn latest_source(&self, app: &AppRecord) -> Result<PathBuf> {
        self.artifacts
            .latest_directory(app.variant, app.id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("no saved {} output for app {}", app.variant, app.id)))
    }
}

/// Make `target` an exact copy of `source`.
///
/// The copy is staged in a sibling directory and swapped in, so a failed
/// copy leaves the previous content of `target` in place.
async fn replace_dir(source: PathBuf, target: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || replace_dir_blocking(&source, &target))
        .await
        .map_err(|e| Error::Collaborator(anyhow::anyhow!("copy task failed: {e}")))?
}

fn replace_dir_blocking(source: &Path, target: &Path) -> Result<()> {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| Error::persistence(parent, e))?;

    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let staging = parent.join(format!(".{name}.staging-{suffix}"));
    let retired = parent.join(format!(".{name}.old-{suffix}"));

    if let Err(e) = copy_tree(source, &staging) {
        let _ = std::fs::remove_dir_all(&staging);
        return Err(e);
    }

    let had_previous = target.exists();
    if had_previous {
        std::fs::rename(target, &retired).map_err(|e| Error::persistence(target, e))?;
    }
    if let Err(e) = std::fs::rename(&staging, target) {
        if had_previous {
            let _ = std::fs::rename(&retired, target);
        }
        let _ = std::fs::remove_dir_all(&staging);
        return Err(Error::persistence(target, e));
    }
    if had_previous {
        if let Err(e) = std::fs::remove_dir_all(&retired) {
            tracing::warn!(path = %retired.display(), error = %e, "Failed to remove previous deployment");
        }
    }
    Ok(())
}

fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().map_or_else(|| source.to_path_buf(), Path::to_path_buf);
            Error::persistence(path, e.into())
        })?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| Error::Collaborator(e.into()))?;
        let to = dest.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&to).map_err(|e| Error::persistence(&to, e))?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &to).map_err(|e| Error::persistence(&to, e))?;
        }
    }
    Ok(())
}
