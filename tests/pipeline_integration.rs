mod common;

use std::sync::Arc;

use axum_codegen_deploy::AppState;
use axum_codegen_deploy::codegen::artifacts::ArtifactStore;
use axum_codegen_deploy::codegen::{AppId, CodeArtifact, GenerationRequest, Variant};
use axum_codegen_deploy::error::Error;
use axum_codegen_deploy::llm::{LlmDriver, MessageRole};
use axum_codegen_deploy::session::ModelDrivers;
use axum_codegen_deploy::store::providers::InMemoryStore;
use axum_codegen_deploy::store::{ChatHistoryStore, ChatTurn, TurnKind};
use axum_codegen_deploy::stream::StreamEvent;
use common::{ScriptedDriver, Step, done, test_config, text, tool_call, tools_finished};
use futures::StreamExt;
use tokio::sync::Notify;

struct Harness {
    _tmp: tempfile::TempDir,
    state: AppState,
    store: Arc<InMemoryStore>,
    artifacts: ArtifactStore,
}

fn harness(driver: Arc<ScriptedDriver>) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let config = Arc::new(test_config(tmp.path()));
    let store = Arc::new(InMemoryStore::new());
    let driver: Arc<dyn LlmDriver> = driver;
    let state = AppState::with_stores(
        Arc::clone(&config),
        ModelDrivers::single(driver),
        Arc::clone(&store) as _,
        Arc::clone(&store) as _,
    );
    let artifacts = ArtifactStore::new(&config.storage.output_root);
    Harness {
        _tmp: tmp,
        state,
        store,
        artifacts,
    }
}

fn request(app_id: u64, variant: Variant, prompt: &str, streaming: bool) -> GenerationRequest {
    GenerationRequest {
        app_id: AppId(app_id),
        user_id: "alice".into(),
        prompt: prompt.into(),
        variant,
        streaming,
    }
}

fn concat_text(events: &[StreamEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::TextDelta { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_single_page_sync_saves_fenced_html() {
    let driver = ScriptedDriver::replying(&["Sure!\n```html\n<h1>", "Hi</h1>\n```\n"]);
    let h = harness(Arc::clone(&driver));

    let result = h
        .state
        .dispatcher
        .generate(&request(1, Variant::SinglePage, "a greeting page", false))
        .await
        .unwrap();

    assert_eq!(
        result.artifact,
        CodeArtifact::SinglePage {
            html: "<h1>Hi</h1>".into()
        }
    );
    let saved = std::fs::read_to_string(result.directory.join("index.html")).unwrap();
    assert_eq!(saved, "<h1>Hi</h1>");
    assert!(
        result
            .directory
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("single_page_1_")
    );

    let turns = h.store.turns(AppId(1)).await;
    let kinds: Vec<_> = turns.iter().map(|t| t.kind).collect();
    assert_eq!(kinds, vec![TurnKind::User, TurnKind::Ai]);
    assert_eq!(turns[0].message, "a greeting page");
}

#[tokio::test]
async fn test_multi_file_stream_saves_css_and_empty_js() {
    let chunks = [
        "```html\n<link rel=\"stylesheet\" href=\"style.css\">\n",
        "<p>hello</p>\n```\n\n```css\n",
        "p { color: red; }\n```\n",
    ];
    let h = harness(ScriptedDriver::replying(&chunks));

    let events: Vec<StreamEvent> = h
        .state
        .dispatcher
        .generate_stream(&request(2, Variant::MultiFile, "hello page", true))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(events.last(), Some(&StreamEvent::Completed));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert_eq!(concat_text(&events), chunks.concat());

    let dir = h
        .artifacts
        .latest_directory(Variant::MultiFile, AppId(2))
        .await
        .unwrap()
        .expect("saved directory");
    assert_eq!(std::fs::read_to_string(dir.join("style.css")).unwrap(), "p { color: red; }");
    assert_eq!(std::fs::read_to_string(dir.join("script.js")).unwrap(), "");
    assert!(
        std::fs::read_to_string(dir.join("index.html"))
            .unwrap()
            .contains("<p>hello</p>")
    );
}

#[tokio::test]
async fn test_mid_stream_failure_keeps_deltas_and_saves_nothing() {
    let driver = ScriptedDriver::new([vec![
        text("```html\n<h1>"),
        text("Half"),
        Step::Fail("connection reset by peer".into()),
        text("never sent"),
    ]]);
    let h = harness(driver);

    let events: Vec<StreamEvent> = h
        .state
        .dispatcher
        .generate_stream(&request(3, Variant::SinglePage, "page", true))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(concat_text(&events), "```html\n<h1>Half");
    let errors: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Error { .. }))
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(matches!(events.last(), Some(StreamEvent::Error { message }) if message.contains("connection reset")));

    assert!(
        h.artifacts
            .latest_directory(Variant::SinglePage, AppId(3))
            .await
            .unwrap()
            .is_none()
    );
    let kinds: Vec<_> = h.store.turns(AppId(3)).await.iter().map(|t| t.kind).collect();
    assert_eq!(kinds, vec![TurnKind::User, TurnKind::Error]);
}

#[tokio::test]
async fn test_project_has_no_sync_form() {
    let driver = ScriptedDriver::replying(&["unused"]);
    let h = harness(Arc::clone(&driver));

    let err = h
        .state
        .dispatcher
        .generate(&request(4, Variant::BuildableProject, "todo app", false))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Configuration(_)));
    assert!(driver.requests().is_empty());
    assert!(h.store.turns(AppId(4)).await.is_empty());
}

#[tokio::test]
async fn test_project_stream_writes_files_through_tools() {
    let driver = ScriptedDriver::new([
        vec![
            tool_call(0, "call_1", "write_file", r#"{"path":"src/index.html","content":"<div id=\"app\"></div>"}"#),
            tool_call(1, "call_2", "write_file", r#"{"path":"package.json","content":"{}"}"#),
            tools_finished(),
        ],
        vec![text("Your project is ready."), done()],
    ]);
    let h = harness(driver);

    let events: Vec<StreamEvent> = h
        .state
        .dispatcher
        .generate_stream(&request(5, Variant::BuildableProject, "todo app", true))
        .await
        .unwrap()
        .collect()
        .await;

    let requested: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::ToolCallRequested { id, name, .. } => Some((id.as_str(), name.as_str())),
            _ => None,
        })
        .collect();
    assert_eq!(requested, vec![("call_1", "write_file"), ("call_2", "write_file")]);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, StreamEvent::ToolCallCompleted { .. }))
            .count(),
        2
    );
    assert_eq!(events.last(), Some(&StreamEvent::Completed));

    let dir = h
        .artifacts
        .latest_directory(Variant::BuildableProject, AppId(5))
        .await
        .unwrap()
        .expect("project directory");
    assert_eq!(
        std::fs::read_to_string(dir.join("src/index.html")).unwrap(),
        "<div id=\"app\"></div>"
    );

    let turns = h.store.turns(AppId(5)).await;
    let reply = &turns.last().unwrap().message;
    assert!(reply.starts_with("Your project is ready."));
    assert_eq!(reply.matches("[tool] write_file").count(), 2);
}

#[tokio::test]
async fn test_eviction_does_not_interrupt_active_stream() {
    let gate = Arc::new(Notify::new());
    let driver = ScriptedDriver::new([vec![
        text("```html\n<p>"),
        Step::Wait(Arc::clone(&gate)),
        text("still here</p>\n```"),
        done(),
    ]]);
    let h = harness(driver);

    let mut stream = h
        .state
        .dispatcher
        .generate_stream(&request(6, Variant::SinglePage, "page", true))
        .await
        .unwrap();

    let first = stream.next().await.unwrap();
    assert_eq!(first, StreamEvent::TextDelta { text: "```html\n<p>".into() });

    assert!(h.state.sessions.invalidate(AppId(6), Variant::SinglePage).await);
    assert!(h.state.sessions.is_empty().await);
    gate.notify_one();

    let rest: Vec<StreamEvent> = stream.collect().await;
    assert_eq!(rest.last(), Some(&StreamEvent::Completed));

    let dir = h
        .artifacts
        .latest_directory(Variant::SinglePage, AppId(6))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(std::fs::read_to_string(dir.join("index.html")).unwrap(), "<p>still here</p>");
}

#[tokio::test]
async fn test_persisted_history_reaches_the_model() {
    let driver = ScriptedDriver::replying(&["```html\n<p>v2</p>\n```"]);
    let h = harness(Arc::clone(&driver));
    h.store
        .append(ChatTurn::new(AppId(7), "alice", TurnKind::User, "make a clock"))
        .await
        .unwrap();
    h.store
        .append(ChatTurn::new(AppId(7), "alice", TurnKind::Ai, "```html\n<p>v1</p>\n```"))
        .await
        .unwrap();
    h.store
        .append(ChatTurn::new(AppId(7), "alice", TurnKind::Error, "Model error: timeout"))
        .await
        .unwrap();

    h.state
        .dispatcher
        .generate(&request(7, Variant::SinglePage, "make it blue", false))
        .await
        .unwrap();

    let requests = driver.requests();
    assert_eq!(requests.len(), 1);
    let messages = &requests[0].messages;
    assert_eq!(messages[0].role, MessageRole::System);
    let contents: Vec<_> = messages[1..]
        .iter()
        .map(|m| (m.role, m.content.clone().unwrap_or_default()))
        .collect();
    assert_eq!(
        contents,
        vec![
            (MessageRole::User, "make a clock".to_string()),
            (MessageRole::Assistant, "```html\n<p>v1</p>\n```".to_string()),
            (MessageRole::User, "make it blue".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_concurrent_generations_never_share_a_directory() {
    let driver = ScriptedDriver::new((0..8).map(|i| vec![text(&format!("```html\n<p>{i}</p>\n```")), done()]));
    let h = Arc::new(harness(driver));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let h = Arc::clone(&h);
        handles.push(tokio::spawn(async move {
            h.state
                .dispatcher
                .generate(&request(8, Variant::SinglePage, "page", false))
                .await
                .unwrap()
                .directory
        }));
    }

    let mut dirs = Vec::new();
    for handle in handles {
        dirs.push(handle.await.unwrap());
    }
    dirs.sort();
    dirs.dedup();
    assert_eq!(dirs.len(), 8);
}

/// History store that loads nothing and refuses every append.
#[derive(Debug)]
struct UnwritableHistory;

#[async_trait::async_trait]
impl ChatHistoryStore for UnwritableHistory {
    async fn load_last(&self, _app_id: AppId, _limit: usize) -> anyhow::Result<Vec<ChatTurn>> {
        Ok(Vec::new())
    }

    async fn append(&self, _turn: ChatTurn) -> anyhow::Result<()> {
        anyhow::bail!("history database is read-only")
    }
}

#[tokio::test]
async fn test_project_stream_leaves_no_workspace_when_history_append_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let config = Arc::new(test_config(tmp.path()));
    let driver = ScriptedDriver::replying(&["unused"]);
    let apps = Arc::new(InMemoryStore::new());
    let state = AppState::with_stores(
        Arc::clone(&config),
        ModelDrivers::single(Arc::clone(&driver) as Arc<dyn LlmDriver>),
        Arc::new(UnwritableHistory),
        apps,
    );

    let result = state
        .dispatcher
        .generate_stream(&request(9, Variant::BuildableProject, "todo app", true))
        .await;
    assert!(matches!(result, Err(Error::Collaborator(_))));
    assert!(driver.requests().is_empty());

    let artifacts = ArtifactStore::new(&config.storage.output_root);
    assert!(
        artifacts
            .latest_directory(Variant::BuildableProject, AppId(9))
            .await
            .unwrap()
            .is_none()
    );
}
