//! Model events to wire events.
//!
//! [`spawn_translator`] runs a producer task that pulls [`ModelEvent`]s,
//! translates them into [`StreamEvent`]s and pushes them into a bounded
//! channel. A slow consumer fills the channel, which parks the producer,
//! which stops pulling from the model. A consumer that goes away ends the
//! task and drops the model stream without running the completion hook.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

use super::StreamEvent;
use crate::error::Result;
use crate::llm::{ModelEvent, ModelEventStream};

/// Default channel capacity between producer and consumer.
pub const DEFAULT_STREAM_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslatorConfig {
    /// Events buffered before the producer blocks.
    pub buffer: usize,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            buffer: DEFAULT_STREAM_BUFFER,
        }
    }
}

/// A tool call that ran during the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedTool {
    pub id: String,
    pub name: String,
    pub arguments: String,
    pub result: String,
}

/// Everything the model produced, handed to the completion hook.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationOutput {
    /// Concatenation of every text delta.
    pub text: String,
    pub tools: Vec<ExecutedTool>,
}

/// Hooks run by the producer task. Exactly one of them runs, once, unless
/// the consumer disconnects first.
#[async_trait]
pub trait StreamCompletion: Send + 'static {
    /// The model completed. An error here is reported as the stream's
    /// terminal `Error` event instead of `Completed`.
    async fn on_complete(self: Box<Self>, output: GenerationOutput) -> Result<()>;

    /// The model failed; `output` holds what arrived before the failure.
    async fn on_error(self: Box<Self>, message: &str, output: GenerationOutput);
}

#[derive(Debug, Default)]
struct PendingCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Spawn the producer task and return the consumer side.
pub fn spawn_translator(
    source: ModelEventStream,
    completion: Box<dyn StreamCompletion>,
    config: TranslatorConfig,
) -> ReceiverStream<StreamEvent> {
    let (tx, rx) = mpsc::channel(config.buffer.max(1));
    tokio::spawn(translate(source, completion, tx).instrument(tracing::Span::current()));
    ReceiverStream::new(rx)
}

async fn send(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> bool {
    if tx.send(event).await.is_err() {
        tracing::debug!("Stream consumer disconnected");
        return false;
    }
    true
}

fn flush_pending(pending: &mut BTreeMap<usize, PendingCall>) -> Vec<StreamEvent> {
    std::mem::take(pending)
        .into_iter()
        .map(|(index, call)| StreamEvent::ToolCallRequested {
            id: call.id.unwrap_or_else(|| format!("call_{index}")),
            name: call.name.unwrap_or_default(),
            arguments: call.arguments,
        })
        .collect()
}

async fn translate(
    mut source: ModelEventStream,
    completion: Box<dyn StreamCompletion>,
    tx: mpsc::Sender<StreamEvent>,
) {
    let mut output = GenerationOutput::default();
    let mut pending: BTreeMap<usize, PendingCall> = BTreeMap::new();

    loop {
        let next = tokio::select! {
            biased;
            () = tx.closed() => {
                tracing::debug!("Stream consumer disconnected, dropping model stream");
                return;
            }
            next = source.next() => next,
        };

        let Some(event) = next else {
            break;
        };

        if !pending.is_empty() && !matches!(event, ModelEvent::PartialToolCall { .. }) {
            for request in flush_pending(&mut pending) {
                if !send(&tx, request).await {
                    return;
                }
            }
        }

        match event {
            ModelEvent::PartialText(text) => {
                output.text.push_str(&text);
                if !send(&tx, StreamEvent::TextDelta { text }).await {
                    return;
                }
            }
            ModelEvent::PartialToolCall {
                index,
                id,
                name,
                arguments_delta,
            } => {
                let call = pending.entry(index).or_default();
                if call.id.is_none() {
                    call.id = id;
                }
                if call.name.is_none() {
                    call.name = name;
                }
                call.arguments.push_str(&arguments_delta);
            }
            ModelEvent::ToolExecuted {
                id,
                name,
                arguments,
                result,
            } => {
                output.tools.push(ExecutedTool {
                    id: id.clone(),
                    name,
                    arguments,
                    result: result.clone(),
                });
                if !send(&tx, StreamEvent::ToolCallCompleted { id, result }).await {
                    return;
                }
            }
            ModelEvent::Completed => {
                let terminal = match completion.on_complete(output).await {
                    Ok(()) => StreamEvent::Completed,
                    Err(e) => {
                        tracing::error!(error = %e, kind = e.kind(), "Completion hook failed");
                        StreamEvent::Error {
                            message: e.to_string(),
                        }
                    }
                };
                send(&tx, terminal).await;
                return;
            }
            ModelEvent::Failed(message) => {
                completion.on_error(&message, output).await;
                send(&tx, StreamEvent::Error { message }).await;
                return;
            }
        }
    }

    let message = "model stream ended unexpectedly".to_string();
    tracing::warn!("{message}");
    completion.on_error(&message, output).await;
    send(&tx, StreamEvent::Error { message }).await;
}
