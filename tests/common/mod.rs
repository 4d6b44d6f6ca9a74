#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use axum_codegen_deploy::config::{
    AppConfig, BuildConfig, SecurityConfig, ServerConfig, SessionsConfig, StorageConfig,
};
use axum_codegen_deploy::deploy::{BuildSettings, BuildStep};
use axum_codegen_deploy::llm::{DriverEvent, DriverStream, LlmDriver, LlmRequest};
use tokio::sync::Notify;

/// One scripted driver action.
#[derive(Debug, Clone)]
pub enum Step {
    Emit(DriverEvent),
    /// Stream item error, as a dropped connection would produce.
    Fail(String),
    /// Block until the gate is notified.
    Wait(Arc<Notify>),
}

pub fn text(s: &str) -> Step {
    Step::Emit(DriverEvent::TextDelta { text: s.into() })
}

pub fn done() -> Step {
    Step::Emit(DriverEvent::Done)
}

pub fn tool_call(index: usize, id: &str, name: &str, args: &str) -> Step {
    Step::Emit(DriverEvent::ToolCallDelta {
        call_index: index,
        id: Some(id.into()),
        name: Some(name.into()),
        arguments_delta: Some(args.into()),
    })
}

pub fn tools_finished() -> Step {
    Step::Emit(DriverEvent::ToolCallsFinished)
}

/// Replays one scripted turn per `stream` call and records every request.
#[derive(Debug, Default)]
pub struct ScriptedDriver {
    turns: Mutex<VecDeque<Vec<Step>>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedDriver {
    pub fn new(turns: impl IntoIterator<Item = Vec<Step>>) -> Arc<Self> {
        Arc::new(Self {
            turns: Mutex::new(turns.into_iter().collect()),
            requests: Mutex::default(),
        })
    }

    /// A single text reply split into `chunks`, then `Done`.
    pub fn replying(chunks: &[&str]) -> Arc<Self> {
        let mut turn: Vec<Step> = chunks.iter().map(|c| text(c)).collect();
        turn.push(done());
        Self::new([turn])
    }

    pub fn push_turn(&self, turn: Vec<Step>) {
        self.turns.lock().unwrap().push_back(turn);
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl LlmDriver for ScriptedDriver {
    async fn stream(&self, req: LlmRequest) -> anyhow::Result<DriverStream> {
        self.requests.lock().unwrap().push(req);
        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("script exhausted"))?;

        Ok(Box::pin(async_stream::stream! {
            for step in turn {
                match step {
                    Step::Emit(event) => yield Ok(event),
                    Step::Fail(message) => yield Err(anyhow::anyhow!(message)),
                    Step::Wait(gate) => gate.notified().await,
                }
            }
        }))
    }
}

/// Config rooted in `root`, JWT optional with `alice` as the fallback user.
pub fn test_config(root: &Path) -> AppConfig {
    test_config_with_build(
        root,
        BuildSettings {
            install: None,
            build: BuildStep::new("sh", ["-c", "mkdir -p dist && cp -R src/. dist/"], std::time::Duration::from_secs(10)),
            output_dir: "dist".into(),
        },
    )
}

pub fn test_config_with_build(root: &Path, build: BuildSettings) -> AppConfig {
    AppConfig {
        server: ServerConfig {
            port: 0,
            host: "127.0.0.1".into(),
        },
        security: SecurityConfig {
            jwt_required: false,
            jwt_secret: "test-secret".into(),
            dev_user: Some("alice".into()),
        },
        storage: StorageConfig {
            output_root: root.join("code_output"),
            deploy_root: root.join("code_deploy"),
            deploy_host: "http://localhost:8123/deploy".into(),
            data_dir: root.join("data"),
        },
        sessions: SessionsConfig {
            max_entries: 100,
            idle_timeout_secs: 600,
            max_age_secs: 1800,
            max_tool_iterations: 8,
            stream_buffer: 16,
        },
        build: BuildConfig {
            skip_install: build.install.is_none(),
            install: build
                .install
                .unwrap_or_else(|| BuildStep::new("true", Vec::<String>::new(), std::time::Duration::from_secs(1))),
            build: build.build,
            output_dir: build.output_dir,
        },
    }
}
