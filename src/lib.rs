//! Prompt-to-deploy code generation.
//!
//! Turns a natural-language prompt into a static web app: the model writes
//! the code (streamed to the caller as it arrives), the output is parsed and
//! saved to a fresh directory, and a deploy publishes the latest save under a
//! stable per-app key, running the project build first when needed.
//!
//! # Architecture
//!
//! - **Server**: Axum HTTP API with SSE streaming and static preview/deploy views
//! - **Generation**: session cache, dispatcher and stream translator over an
//!   OpenAI-compatible driver
//! - **Deploy**: subprocess build and directory publish
//!
//! # Modules
//!
//! - [`codegen`]: variants, artifacts, the code block parser and directory allocation
//! - [`llm`]: driver trait, Chat Completions driver, direct and agent clients
//! - [`tools`]: sandboxed file tools for the project agent
//! - [`session`]: session cache and conversation memory
//! - [`stream`]: wire events and the stream translator
//! - [`dispatcher`]: variant routing, persistence and chat history
//! - [`routing`]: model-chosen variant for new apps
//! - [`deploy`]: build and deploy, and project downloads
//! - [`store`]: chat history and app metadata collaborators

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]

pub mod codegen;
pub mod config;
pub mod deploy;
pub mod dispatcher;
pub mod error;
pub mod llm;
pub mod routing;
pub mod security;
pub mod server;
pub mod session;
pub mod store;
pub mod stream;
pub mod telemetry;
pub mod tools;

use std::sync::Arc;

use crate::codegen::artifacts::ArtifactStore;
use crate::config::AppConfig;
use crate::deploy::{DeployService, DeploySettings, ProjectBuilder};
use crate::dispatcher::GenerationDispatcher;
use crate::routing::VariantRouter;
use crate::session::{ChatMemoryStore, ModelDrivers, SessionCache};
use crate::store::providers::JsonFileStore;
use crate::store::{AppStore, ChatHistoryStore};

/// Application state shared across all handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Generation entry point.
    pub dispatcher: Arc<GenerationDispatcher>,
    /// Build and publish.
    pub deployer: Arc<DeployService>,
    /// Variant choice for apps created without one.
    pub router: Arc<VariantRouter>,
    /// Session cache, swept in the background.
    pub sessions: Arc<SessionCache>,
    /// App metadata, used for ownership checks.
    pub apps: Arc<dyn AppStore>,
    /// Global Configuration
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// State backed by the JSON file store in `storage.data_dir`.
    pub async fn from_config(config: Arc<AppConfig>, drivers: ModelDrivers) -> anyhow::Result<Self> {
        let store = Arc::new(JsonFileStore::open(&config.storage.data_dir).await?);
        let history: Arc<dyn ChatHistoryStore> = Arc::clone(&store) as _;
        Ok(Self::with_stores(config, drivers, history, store))
    }

    /// Wire every service from explicit collaborators.
    pub fn with_stores(
        config: Arc<AppConfig>,
        drivers: ModelDrivers,
        history: Arc<dyn ChatHistoryStore>,
        apps: Arc<dyn AppStore>,
    ) -> Self {
        let artifacts = Arc::new(ArtifactStore::new(&config.storage.output_root));
        let router = Arc::new(VariantRouter::new(Arc::clone(&drivers.chat)));
        let sessions = Arc::new(SessionCache::new(
            config.sessions.session_settings(),
            drivers,
            Arc::clone(&history),
            Arc::new(ChatMemoryStore::new()),
        ));
        let dispatcher = Arc::new(GenerationDispatcher::new(
            Arc::clone(&sessions),
            Arc::clone(&artifacts),
            history,
            config.sessions.translator(),
        ));
        let deployer = Arc::new(DeployService::new(
            Arc::clone(&apps),
            artifacts,
            ProjectBuilder::new(config.build.build_settings()),
            DeploySettings {
                deploy_root: config.storage.deploy_root.clone(),
                deploy_host: config.storage.deploy_host.clone(),
            },
        ));

        Self {
            dispatcher,
            deployer,
            router,
            sessions,
            apps,
            config,
        }
    }
}
