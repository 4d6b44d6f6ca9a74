//! Generation dispatcher.
//!
//! Routes a [`GenerationRequest`] by variant:
//!
//! | Variant             | Sync                 | Streaming                                   |
//! |---------------------|----------------------|---------------------------------------------|
//! | `single_page`       | complete, parse, save | buffer deltas, parse and save on completion |
//! | `multi_file`        | complete, parse, save | buffer deltas, parse and save on completion |
//! | `buildable_project` | rejected             | agent tool calls write into a fresh directory |
//!
//! Chat history gets the user turn before the model is called and an `ai`
//! or `error` turn once the outcome is known.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio_stream::wrappers::ReceiverStream;

use crate::codegen::artifacts::{ArtifactStore, GenerationId};
use crate::codegen::parser::{self, Parsed};
use crate::codegen::{AppId, CodeArtifact, GenerationRequest, Variant};
use crate::error::{Error, Result};
use crate::session::SessionCache;
use crate::store::{ChatHistoryStore, ChatTurn, TurnKind};
use crate::stream::translator::GenerationOutput;
use crate::stream::{StreamCompletion, StreamEvent, TranslatorConfig, spawn_translator};

/// Longest tool argument excerpt kept in the history summary.
const TOOL_SUMMARY_ARGS: usize = 120;

/// Output of a synchronous generation.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    #[serde(skip)]
    pub generation_id: GenerationId,
    pub directory: PathBuf,
    pub artifact: CodeArtifact,
}

/// Wires sessions, parsing and persistence together.
#[derive(Debug, Clone)]
pub struct GenerationDispatcher {
    sessions: Arc<SessionCache>,
    artifacts: Arc<ArtifactStore>,
    history: Arc<dyn ChatHistoryStore>,
    translator: TranslatorConfig,
}

impl GenerationDispatcher {
    pub fn new(
        sessions: Arc<SessionCache>,
        artifacts: Arc<ArtifactStore>,
        history: Arc<dyn ChatHistoryStore>,
        translator: TranslatorConfig,
    ) -> Self {
        Self {
            sessions,
            artifacts,
            history,
            translator,
        }
    }

    /// Generate, parse and persist in one call.
    ///
    /// Project generation only exists in streaming form and is rejected with
    /// [`Error::Configuration`] before any model contact.
    #[tracing::instrument(skip(self, request), fields(app_id = %request.app_id, variant = %request.variant))]
    pub async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        if request.variant.uses_tools() {
            return Err(Error::Configuration(format!(
                "{} generation is only available as a stream",
                request.variant
            )));
        }

        let session = self.sessions.get_or_create(request.app_id, request.variant).await?;
        self.append_turn(request.app_id, &request.user_id, TurnKind::User, &request.prompt)
            .await?;

        let text = match session.complete(request.prompt.clone()).await {
            Ok(text) => text,
            Err(e) => {
                record_failure(&*self.history, request.app_id, &request.user_id, &e.to_string()).await;
                return Err(e);
            }
        };

        let saved = parse_and_save(&self.artifacts, request.app_id, request.variant, &text).await;
        let (directory, generation_id, artifact) = match saved {
            Ok(saved) => saved,
            Err(e) => {
                record_failure(&*self.history, request.app_id, &request.user_id, &e.to_string()).await;
                return Err(e);
            }
        };
        record_reply(&*self.history, request.app_id, &request.user_id, text).await;

        Ok(GenerationResult {
            generation_id,
            directory,
            artifact,
        })
    }

    /// Start a streamed generation.
    ///
    /// Errors returned here happen before the model is contacted; once the
    /// stream exists every failure arrives as its terminal `Error` event.
    #[tracing::instrument(skip(self, request), fields(app_id = %request.app_id, variant = %request.variant))]
    pub async fn generate_stream(&self, request: &GenerationRequest) -> Result<ReceiverStream<StreamEvent>> {
        let session = self.sessions.get_or_create(request.app_id, request.variant).await?;

        self.append_turn(request.app_id, &request.user_id, TurnKind::User, &request.prompt)
            .await?;

        let (workspace, completion): (Option<PathBuf>, Box<dyn StreamCompletion>) = match request.variant {
            Variant::SinglePage | Variant::MultiFile => (
                None,
                Box::new(PersistOnComplete {
                    app_id: request.app_id,
                    user_id: request.user_id.clone(),
                    variant: request.variant,
                    artifacts: Arc::clone(&self.artifacts),
                    history: Arc::clone(&self.history),
                }) as Box<dyn StreamCompletion>,
            ),
            Variant::BuildableProject => {
                let dir = self.artifacts.allocate(request.variant, request.app_id).await?;
                tracing::info!(
                    generation_id = %dir.generation_id,
                    path = %dir.path.display(),
                    "Project workspace allocated"
                );
                (
                    Some(dir.path),
                    Box::new(RecordProjectTurn {
                        app_id: request.app_id,
                        user_id: request.user_id.clone(),
                        history: Arc::clone(&self.history),
                    }) as Box<dyn StreamCompletion>,
                )
            }
        };

        let source = session.stream(request.prompt.clone(), workspace)?;
        Ok(spawn_translator(source, completion, self.translator))
    }

    async fn append_turn(&self, app_id: AppId, user_id: &str, kind: TurnKind, message: &str) -> Result<()> {
        self.history
            .append(ChatTurn::new(app_id, user_id, kind, message))
            .await
            .map_err(Error::from)
    }
}

async fn parse_and_save(
    artifacts: &ArtifactStore,
    app_id: AppId,
    variant: Variant,
    text: &str,
) -> Result<(PathBuf, GenerationId, CodeArtifact)> {
    let Parsed { artifact, warnings } = parser::parse(text, variant)?;
    for warning in &warnings {
        tracing::warn!(app_id = %app_id, variant = %variant, warning = ?warning, "Model output degraded");
    }
    let dir = artifacts.save(app_id, &artifact).await?;
    Ok((dir.path, dir.generation_id, artifact))
}

async fn record_reply(history: &dyn ChatHistoryStore, app_id: AppId, user_id: &str, message: String) {
    if let Err(e) = history
        .append(ChatTurn::new(app_id, user_id, TurnKind::Ai, message))
        .await
    {
        tracing::warn!(app_id = %app_id, error = %e, "Failed to record model reply");
    }
}

async fn record_failure(history: &dyn ChatHistoryStore, app_id: AppId, user_id: &str, message: &str) {
    if let Err(e) = history
        .append(ChatTurn::new(app_id, user_id, TurnKind::Error, message))
        .await
    {
        tracing::warn!(app_id = %app_id, error = %e, "Failed to record generation failure");
    }
}

/// Parses and saves the buffered reply of a text-only generation.
#[derive(Debug)]
struct PersistOnComplete {
    app_id: AppId,
    user_id: String,
    variant: Variant,
    artifacts: Arc<ArtifactStore>,
    history: Arc<dyn ChatHistoryStore>,
}

#[async_trait]
impl StreamCompletion for PersistOnComplete {
    async fn on_complete(self: Box<Self>, output: GenerationOutput) -> Result<()> {
        match parse_and_save(&self.artifacts, self.app_id, self.variant, &output.text).await {
            Ok((directory, generation_id, _)) => {
                tracing::info!(
                    app_id = %self.app_id,
                    generation_id = %generation_id,
                    path = %directory.display(),
                    "Streamed generation saved"
                );
                record_reply(&*self.history, self.app_id, &self.user_id, output.text).await;
                Ok(())
            }
            Err(e) => {
                record_failure(&*self.history, self.app_id, &self.user_id, &e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn on_error(self: Box<Self>, message: &str, output: GenerationOutput) {
        tracing::warn!(
            app_id = %self.app_id,
            discarded_bytes = output.text.len(),
            error = %message,
            "Streamed generation failed, partial reply discarded"
        );
        record_failure(&*self.history, self.app_id, &self.user_id, message).await;
    }
}

/// Records the agent's reply; its files are already on disk.
#[derive(Debug)]
struct RecordProjectTurn {
    app_id: AppId,
    user_id: String,
    history: Arc<dyn ChatHistoryStore>,
}

#[async_trait]
impl StreamCompletion for RecordProjectTurn {
    async fn on_complete(self: Box<Self>, output: GenerationOutput) -> Result<()> {
        tracing::info!(
            app_id = %self.app_id,
            tool_calls = output.tools.len(),
            "Project generation completed"
        );
        record_reply(&*self.history, self.app_id, &self.user_id, project_summary(&output)).await;
        Ok(())
    }

    async fn on_error(self: Box<Self>, message: &str, output: GenerationOutput) {
        tracing::warn!(
            app_id = %self.app_id,
            tool_calls = output.tools.len(),
            error = %message,
            "Project generation failed, files written so far are kept"
        );
        record_failure(&*self.history, self.app_id, &self.user_id, message).await;
    }
}

/// Reply text followed by one line per executed tool call.
fn project_summary(output: &GenerationOutput) -> String {
    let mut summary = output.text.trim_end().to_string();
    for tool in &output.tools {
        if !summary.is_empty() {
            summary.push('\n');
        }
        let args: String = tool.arguments.chars().take(TOOL_SUMMARY_ARGS).collect();
        let ellipsis = if tool.arguments.chars().count() > TOOL_SUMMARY_ARGS { "..." } else { "" };
        let _ = write!(summary, "[tool] {} {args}{ellipsis}", tool.name);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::translator::ExecutedTool;

    #[test]
    fn test_project_summary_lists_tools() {
        let output = GenerationOutput {
            text: "Built a todo app.\n".into(),
            tools: vec![ExecutedTool {
                id: "c1".into(),
                name: "write_file".into(),
                arguments: format!(r#"{{"path":"src/App.vue","content":"{}"}}"#, "x".repeat(300)),
                result: "Wrote src/App.vue".into(),
            }],
        };
        let summary = project_summary(&output);
        let lines: Vec<_> = summary.lines().collect();
        assert_eq!(lines[0], "Built a todo app.");
        assert!(lines[1].starts_with(r#"[tool] write_file {"path":"src/App.vue""#));
        assert!(lines[1].ends_with("..."));
    }
}
