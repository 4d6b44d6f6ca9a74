use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use tracing::info;

use crate::AppState;
use crate::codegen::{AppId, GenerationRequest, Variant};
use crate::config::{AppConfig, ModelSettings};
use crate::deploy::DeploymentRecord;
use crate::error::Error;
use crate::llm::{ChatCompletionsDriver, LlmDriver};
use crate::security::{UserContext, auth_middleware};
use crate::session::ModelDrivers;
use crate::store::AppRecord;
use crate::stream::build_sse_response;

/// How often idle and expired sessions are swept.
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>, models: ModelSettings) -> anyhow::Result<()> {
    info!(
        name: "llm.config.loaded",
        base_url = %models.chat.base_url,
        model = %models.chat.model,
        reasoning_model = %models.reasoning.model,
        "LLM configuration loaded"
    );

    let chat: Arc<dyn LlmDriver> = Arc::new(ChatCompletionsDriver::new(models.chat));
    let reasoning: Arc<dyn LlmDriver> = Arc::new(ChatCompletionsDriver::new(models.reasoning));
    let state = AppState::from_config(Arc::clone(&config), ModelDrivers { chat, reasoning }).await?;

    let sessions = Arc::clone(&state.sessions);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        loop {
            tick.tick().await;
            let evicted = sessions.evict_expired().await;
            if evicted > 0 {
                tracing::debug!(evicted, "Swept expired sessions");
            }
        }
    });

    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        output_root = %config.storage.output_root.display(),
        deploy_root = %config.storage.deploy_root.display(),
        "Server started"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

/// All routes, with auth applied to the API and static views left public.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/apps", post(create_app))
        .route("/api/apps/{app_id}", get(get_app))
        .route("/api/apps/{app_id}/generate", post(generate))
        .route("/api/apps/{app_id}/generate/stream", get(generate_stream))
        .route("/api/apps/{app_id}/deploy", post(deploy))
        .route("/api/apps/{app_id}/download", get(download))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(api)
        .route("/health", get(|| async { "ok" }))
        .nest_service("/preview", ServeDir::new(&state.config.storage.output_root))
        .nest_service("/deploy", ServeDir::new(&state.config.storage.deploy_root))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Error responses
// ─────────────────────────────────────────────────────────────────────────────

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Configuration(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Authorization { .. } => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Model(_) => StatusCode::BAD_GATEWAY,
            Self::Persistence { .. }
            | Self::Build { .. }
            | Self::BuildOutputMissing { .. }
            | Self::Collaborator(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), error = %self, "Request failed");
        }
        let body = serde_json::json!({ "error": self.kind(), "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Load an app and check the caller owns it.
async fn owned_app(state: &AppState, app_id: AppId, user: &UserContext) -> Result<AppRecord, Error> {
    let app = state
        .apps
        .get_app(app_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("app {app_id}")))?;
    if app.owner_id != user.user_id {
        return Err(Error::Authorization {
            user_id: user.user_id.clone(),
            app_id,
        });
    }
    Ok(app)
}

#[derive(Debug, Deserialize)]
struct CreateAppRequest {
    #[serde(default)]
    variant: Option<String>,
    /// First prompt; the model picks the variant from it when none is given.
    #[serde(default)]
    prompt: Option<String>,
}

/// POST /api/apps - Register an app owned by the caller.
async fn create_app(
    State(state): State<AppState>,
    user: UserContext,
    Json(req): Json<CreateAppRequest>,
) -> Result<(StatusCode, Json<AppRecord>), Error> {
    let variant: Variant = match (req.variant, req.prompt) {
        (Some(variant), _) => variant.parse()?,
        (None, Some(prompt)) if !prompt.trim().is_empty() => state.router.route(&prompt).await?,
        (None, _) => {
            return Err(Error::Configuration("either variant or prompt is required".into()));
        }
    };
    let app = state.apps.create_app(&user.user_id, variant).await?;
    Ok((StatusCode::CREATED, Json(app)))
}

/// GET /api/apps/{app_id}
async fn get_app(
    State(state): State<AppState>,
    user: UserContext,
    Path(app_id): Path<u64>,
) -> Result<Json<AppRecord>, Error> {
    Ok(Json(owned_app(&state, AppId(app_id), &user).await?))
}

/// Request body for the synchronous generation API.
#[derive(Debug, Deserialize)]
struct GenerateRequest {
    message: String,
    /// Defaults to the app's own variant.
    #[serde(default)]
    variant: Option<String>,
}

/// POST /api/apps/{app_id}/generate - Generate and save in one call.
async fn generate(
    State(state): State<AppState>,
    user: UserContext,
    Path(app_id): Path<u64>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<crate::dispatcher::GenerationResult>, Error> {
    let app = owned_app(&state, AppId(app_id), &user).await?;
    let variant = req.variant.as_deref().unwrap_or(app.variant.as_str());
    let request = GenerationRequest::parse(app.id, &user.user_id, req.message, variant, false)?;

    tracing::info!(app_id = %app.id, variant = %request.variant, "Received generation request");
    Ok(Json(state.dispatcher.generate(&request).await?))
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    message: String,
}

/// GET /api/apps/{app_id}/generate/stream?message=... - SSE generation.
async fn generate_stream(
    State(state): State<AppState>,
    user: UserContext,
    Path(app_id): Path<u64>,
    Query(query): Query<StreamQuery>,
) -> Result<Response, Error> {
    let app = owned_app(&state, AppId(app_id), &user).await?;
    if query.message.trim().is_empty() {
        return Err(Error::Configuration("message cannot be empty".into()));
    }
    let request = GenerationRequest {
        app_id: app.id,
        user_id: user.user_id,
        prompt: query.message,
        variant: app.variant,
        streaming: true,
    };

    tracing::info!(app_id = %app.id, variant = %request.variant, "Received streaming generation request");
    let events = state.dispatcher.generate_stream(&request).await?;
    Ok(build_sse_response(events).into_response())
}

#[derive(Debug, Serialize)]
struct DeployResponse {
    url: String,
    deploy_key: String,
    deployed_at: chrono::DateTime<chrono::Utc>,
}

impl From<DeploymentRecord> for DeployResponse {
    fn from(record: DeploymentRecord) -> Self {
        Self {
            url: record.url,
            deploy_key: record.deploy_key,
            deployed_at: record.deployed_at,
        }
    }
}

/// POST /api/apps/{app_id}/deploy - Build if needed and publish the latest save.
async fn deploy(
    State(state): State<AppState>,
    user: UserContext,
    Path(app_id): Path<u64>,
) -> Result<Json<DeployResponse>, Error> {
    let record = state.deployer.deploy(AppId(app_id), &user.user_id).await?;
    Ok(Json(record.into()))
}

/// GET /api/apps/{app_id}/download - Zip of the latest saved sources.
async fn download(
    State(state): State<AppState>,
    user: UserContext,
    Path(app_id): Path<u64>,
) -> Result<Response, Error> {
    let archive = state.deployer.download(AppId(app_id), &user.user_id).await?;
    let disposition = format!("attachment; filename=\"{}\"", archive.file_name);
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        archive.bytes,
    )
        .into_response())
}
