//! Tool-calling agent loop for project generation.
//!
//! The agent:
//! 1. Sends the conversation and the file tool definitions to the model
//! 2. Streams the reply, assembling tool call fragments
//! 3. Executes the tool calls inside the generation workspace
//! 4. Feeds the results back and repeats until the model answers without tools
//!
//! The current prompt's messages stay outside the memory window while the loop
//! runs, so a turn with many tool calls cannot push the prompt out of its own
//! requests. They are committed to memory when the loop ends, so a follow-up
//! prompt sees which files were written.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use uuid::Uuid;

use super::{DriverEvent, LlmDriver, LlmRequest, Message, ModelEvent, ModelEventStream, ToolCall};
use crate::session::MessageWindowMemory;
use crate::tools::{ToolRegistry, Workspace};

/// Default cap on model round trips per prompt.
pub const DEFAULT_MAX_TOOL_ITERATIONS: usize = 20;

#[derive(Debug, Default, Clone)]
struct ToolCallAccumulator {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Streaming agent that writes a project through file tools.
#[derive(Debug, Clone)]
pub struct AgentClient {
    driver: Arc<dyn LlmDriver>,
    system_prompt: &'static str,
    max_iterations: usize,
}

impl AgentClient {
    pub fn new(driver: Arc<dyn LlmDriver>, system_prompt: &'static str) -> Self {
        Self {
            driver,
            system_prompt,
            max_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
        }
    }

    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Run the tool loop for one prompt, with file tools rooted at `workspace`.
    #[allow(clippy::too_many_lines)]
    pub fn stream(
        &self,
        memory: MessageWindowMemory,
        prompt: String,
        workspace: PathBuf,
    ) -> ModelEventStream {
        let agent = self.clone();
        let request_id = Uuid::new_v4().to_string();
        let tools = ToolRegistry::project_tools(&Workspace::new(workspace));
        let tool_json = tools.openai_tools_json();

        tracing::info!(
            request_id = %request_id,
            app_id = %memory.app_id(),
            tool_count = tool_json.len(),
            max_iterations = agent.max_iterations,
            "Starting agent loop"
        );

        Box::pin(async_stream::stream! {
            let history = memory.messages().await;
            let mut turn = vec![Message::user(prompt)];

            for iteration in 1..=agent.max_iterations {
                let mut messages = Vec::with_capacity(history.len() + turn.len() + 1);
                messages.push(Message::system(agent.system_prompt));
                messages.extend(history.iter().cloned());
                messages.extend(turn.iter().cloned());

                tracing::info!(
                    request_id = %request_id,
                    iteration,
                    message_count = messages.len(),
                    "Starting tool loop iteration"
                );

                let req = LlmRequest {
                    messages,
                    tools: tool_json.clone(),
                };
                let driver_stream = match agent.driver.stream(req).await {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::error!(
                            request_id = %request_id,
                            iteration,
                            error = %e,
                            "Failed to create driver stream"
                        );
                        commit(&memory, turn).await;
                        yield ModelEvent::Failed(e.to_string());
                        return;
                    }
                };

                let mut accumulators: BTreeMap<usize, ToolCallAccumulator> = BTreeMap::new();
                let mut assistant_text = String::new();
                let mut finished = false;

                futures::pin_mut!(driver_stream);
                while let Some(result) = driver_stream.next().await {
                    match result {
                        Ok(DriverEvent::TextDelta { text }) => {
                            assistant_text.push_str(&text);
                            yield ModelEvent::PartialText(text);
                        }
                        Ok(DriverEvent::ToolCallDelta { call_index, id, name, arguments_delta }) => {
                            let acc = accumulators.entry(call_index).or_default();
                            if acc.id.is_none() {
                                acc.id.clone_from(&id);
                            }
                            if acc.name.is_none() {
                                acc.name.clone_from(&name);
                            }
                            let arguments_delta = arguments_delta.unwrap_or_default();
                            acc.arguments.push_str(&arguments_delta);
                            yield ModelEvent::PartialToolCall {
                                index: call_index,
                                id,
                                name,
                                arguments_delta,
                            };
                        }
                        Ok(DriverEvent::ToolCallsFinished | DriverEvent::Done) => finished = true,
                        Err(e) => {
                            tracing::error!(
                                request_id = %request_id,
                                iteration,
                                error = %e,
                                "Model stream failed"
                            );
                            commit(&memory, turn).await;
                            yield ModelEvent::Failed(e.to_string());
                            return;
                        }
                    }
                }

                if !finished {
                    tracing::warn!(request_id = %request_id, iteration, "Model stream ended without a finish marker");
                    commit(&memory, turn).await;
                    return;
                }

                let tool_calls: Vec<ToolCall> = accumulators
                    .into_values()
                    .filter_map(|acc| {
                        let name = acc.name?;
                        let id = acc.id.unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
                        Some(ToolCall::function(id, name, acc.arguments))
                    })
                    .collect();

                if tool_calls.is_empty() {
                    tracing::info!(
                        request_id = %request_id,
                        iteration,
                        reply_length = assistant_text.len(),
                        "No tool calls to process, completing"
                    );
                    turn.push(Message::assistant(assistant_text));
                    commit(&memory, turn).await;
                    yield ModelEvent::Completed;
                    return;
                }

                turn.push(Message::assistant_tool_calls(Some(assistant_text), tool_calls.clone()));

                for call in tool_calls {
                    tracing::info!(
                        request_id = %request_id,
                        iteration,
                        tool_id = %call.id,
                        tool_name = %call.function.name,
                        args_length = call.function.arguments.len(),
                        "Executing tool call"
                    );

                    let outcome = tools.call(&call.function.name, &call.function.arguments).await;
                    if outcome.success {
                        tracing::debug!(request_id = %request_id, tool_id = %call.id, result = %outcome.content, "Tool call succeeded");
                    } else {
                        tracing::warn!(request_id = %request_id, tool_id = %call.id, result = %outcome.content, "Tool call failed");
                    }

                    turn.push(Message::tool_result(call.id.clone(), outcome.content.clone()));
                    yield ModelEvent::ToolExecuted {
                        id: call.id,
                        name: call.function.name,
                        arguments: call.function.arguments,
                        result: outcome.content,
                    };
                }
            }

            tracing::error!(
                request_id = %request_id,
                max_iterations = agent.max_iterations,
                "Maximum tool loop iterations exceeded"
            );
            commit(&memory, turn).await;
            yield ModelEvent::Failed("maximum tool loop iterations exceeded".to_string());
        })
    }
}

/// Append one prompt's messages to memory, which applies the window.
async fn commit(memory: &MessageWindowMemory, turn: Vec<Message>) {
    for message in turn {
        memory.add(message).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::codegen::AppId;
    use crate::llm::{DriverStream, MessageRole};
    use crate::session::ChatMemoryStore;

    /// Replays one scripted response per call and records each request.
    #[derive(Debug)]
    struct Script {
        turns: Mutex<Vec<Vec<DriverEvent>>>,
        requests: Arc<Mutex<Vec<LlmRequest>>>,
    }

    impl Script {
        fn new(turns: Vec<Vec<DriverEvent>>) -> Self {
            Self {
                turns: Mutex::new(turns),
                requests: Arc::default(),
            }
        }
    }

    #[async_trait::async_trait]
    impl LlmDriver for Script {
        async fn stream(&self, req: LlmRequest) -> anyhow::Result<DriverStream> {
            self.requests.lock().unwrap().push(req);
            let mut turns = self.turns.lock().unwrap();
            let turn = if turns.is_empty() { Vec::new() } else { turns.remove(0) };
            Ok(Box::pin(futures::stream::iter(turn.into_iter().map(Ok))))
        }
    }

    fn tool_delta(index: usize, id: &str, name: &str, args: &str) -> DriverEvent {
        DriverEvent::ToolCallDelta {
            call_index: index,
            id: Some(id.into()),
            name: Some(name.into()),
            arguments_delta: Some(args.into()),
        }
    }

    #[tokio::test]
    async fn test_agent_writes_files_then_completes() {
        let tmp = tempfile::tempdir().unwrap();
        let driver = Script::new(vec![
            vec![
                tool_delta(0, "c1", "write_file", r#"{"path":"index.html","content":"<div id=app></div>"}"#),
                tool_delta(1, "c2", "launch_rocket", "{}"),
                DriverEvent::ToolCallsFinished,
            ],
            vec![DriverEvent::TextDelta { text: "Project ready.".into() }, DriverEvent::Done],
        ]);
        let agent = AgentClient::new(Arc::new(driver), "sys");
        let memory = MessageWindowMemory::new(AppId(3), 10, Arc::new(ChatMemoryStore::new()));

        let events: Vec<_> = agent
            .stream(memory, "todo app".into(), tmp.path().to_path_buf())
            .collect()
            .await;

        let executed: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ModelEvent::ToolExecuted { name, result, .. } => Some((name.as_str(), result.as_str())),
                _ => None,
            })
            .collect();
        assert_eq!(executed[0], ("write_file", "Wrote index.html"));
        assert_eq!(executed[1], ("launch_rocket", "Error: there is no tool called launch_rocket"));
        assert_eq!(events.last(), Some(&ModelEvent::Completed));
        assert!(tmp.path().join("index.html").is_file());
    }

    #[tokio::test]
    async fn test_agent_stops_after_max_iterations() {
        let tmp = tempfile::tempdir().unwrap();
        let looping = || vec![tool_delta(0, "c", "list_dir", "{}"), DriverEvent::ToolCallsFinished];
        let driver = Script::new(vec![looping(), looping(), looping()]);
        let agent = AgentClient::new(Arc::new(driver), "sys").with_max_iterations(2);
        let memory = MessageWindowMemory::new(AppId(3), 10, Arc::new(ChatMemoryStore::new()));

        let events: Vec<_> = agent
            .stream(memory, "loop".into(), tmp.path().to_path_buf())
            .collect()
            .await;
        assert!(matches!(events.last(), Some(ModelEvent::Failed(m)) if m.contains("maximum")));
    }

    #[tokio::test]
    async fn test_many_tool_calls_keep_the_prompt_in_view() {
        let tmp = tempfile::tempdir().unwrap();
        let mut first = (0..12)
            .map(|i| {
                tool_delta(
                    i,
                    &format!("c{i}"),
                    "write_file",
                    &format!(r#"{{"path":"f{i}.txt","content":"{i}"}}"#),
                )
            })
            .collect::<Vec<_>>();
        first.push(DriverEvent::ToolCallsFinished);
        let driver = Script::new(vec![
            first,
            vec![DriverEvent::TextDelta { text: "done".into() }, DriverEvent::Done],
        ]);
        let requests = Arc::clone(&driver.requests);
        let agent = AgentClient::new(Arc::new(driver), "sys");
        let store = Arc::new(ChatMemoryStore::new());
        let memory = MessageWindowMemory::new(AppId(4), 10, Arc::clone(&store));
        memory.add(Message::user("earlier")).await;
        memory.add(Message::assistant("earlier reply")).await;

        let events: Vec<_> = agent
            .stream(memory.clone(), "twelve files".into(), tmp.path().to_path_buf())
            .collect()
            .await;
        assert_eq!(events.last(), Some(&ModelEvent::Completed));

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let second = &requests[1].messages;
        assert_eq!(second[0].role, MessageRole::System);
        assert_eq!(second[1].content.as_deref(), Some("earlier"));
        assert_eq!(second[3].role, MessageRole::User);
        assert_eq!(second[3].content.as_deref(), Some("twelve files"));
        assert_eq!(second[4].role, MessageRole::Assistant);
        assert_eq!(second[4].tool_calls.as_ref().map(Vec::len), Some(12));
        assert_eq!(second.iter().filter(|m| m.role == MessageRole::Tool).count(), 12);

        let window = memory.messages().await;
        assert!(window.len() <= 10);
        assert_ne!(window[0].role, MessageRole::Tool);
        assert_eq!(window.last().and_then(|m| m.content.as_deref()), Some("done"));
    }
}
