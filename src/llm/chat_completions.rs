//! OpenAI-compatible Chat Completions driver.
//!
//! Streams `/v1/chat/completions` with `stream: true` and decodes the SSE
//! frames into [`DriverEvent`]s.

use futures::StreamExt;

use super::{DriverEvent, DriverStream, LlmDriver, LlmRequest, LlmSettings};

/// Driver for the Chat Completions API.
#[derive(Clone)]
pub struct ChatCompletionsDriver {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl std::fmt::Debug for ChatCompletionsDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsDriver")
            .field("base_url", &self.settings.base_url)
            .field("model", &self.settings.model)
            .field("provider", &self.settings.provider)
            .finish_non_exhaustive()
    }
}

impl ChatCompletionsDriver {
    #[must_use]
    pub fn new(settings: LlmSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    fn request_body(&self, req: LlmRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "stream": true,
            "messages": req.messages,
        });
        if self.settings.provider.sends_model() {
            body["model"] = serde_json::Value::String(self.settings.model.clone());
        }
        if !req.tools.is_empty() {
            body["tools"] = serde_json::Value::Array(req.tools);
            if let Some(parallel) = self.settings.parallel_tool_calls {
                body["parallel_tool_calls"] = serde_json::Value::Bool(parallel);
            }
        }
        body
    }
}

#[async_trait::async_trait]
impl LlmDriver for ChatCompletionsDriver {
    async fn stream(&self, req: LlmRequest) -> anyhow::Result<DriverStream> {
        let url = self.settings.provider.chat_url(&self.settings.base_url);
        let message_count = req.messages.len();
        let tool_count = req.tools.len();
        let body = self.request_body(req);

        tracing::debug!(
            url = %url,
            model = %self.settings.model,
            message_count,
            tool_count,
            "Sending chat completions request"
        );

        let mut rb = self.http.post(&url).json(&body);
        if let Some(key) = &self.settings.api_key {
            rb = if self.settings.provider.uses_api_key_header() {
                rb.header("api-key", key)
            } else {
                rb.bearer_auth(key)
            };
        }

        let resp = rb.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("model endpoint returned {status}: {}", text.trim());
        }
        let byte_stream = resp.bytes_stream();

        let out = async_stream::try_stream! {
            let mut decoder = SseDecoder::default();

            futures::pin_mut!(byte_stream);
            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk?;
                for event in decoder.push(&chunk)? {
                    yield event;
                }
            }
            if let Some(event) = decoder.finish() {
                yield event;
            }
        };

        Ok(Box::pin(out))
    }
}

/// Incremental decoder for Chat Completions SSE frames.
#[derive(Debug, Default)]
struct SseDecoder {
    buf: Vec<u8>,
    saw_finish_reason: bool,
    done: bool,
}

impl SseDecoder {
    /// Feed raw bytes; returns the events of every complete frame.
    fn push(&mut self, chunk: &[u8]) -> anyhow::Result<Vec<DriverEvent>> {
        self.buf.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(pos) = find_double_newline(&self.buf) {
            let frame = self.buf.drain(..pos + 2).collect::<Vec<_>>();
            let text = String::from_utf8_lossy(&frame);

            for line in text.lines() {
                let Some(data) = line.trim().strip_prefix("data:") else {
                    continue;
                };
                self.decode_data(data.trim(), &mut events)?;
            }
        }
        Ok(events)
    }

    /// Called once the byte stream ends. Providers that never send `[DONE]`
    /// still get a terminal event if they reported a finish reason.
    fn finish(&mut self) -> Option<DriverEvent> {
        (self.saw_finish_reason && !self.done).then(|| {
            self.done = true;
            DriverEvent::Done
        })
    }

    fn decode_data(&mut self, data: &str, events: &mut Vec<DriverEvent>) -> anyhow::Result<()> {
        if data == "[DONE]" {
            if !self.done {
                self.done = true;
                events.push(DriverEvent::Done);
            }
            return Ok(());
        }

        let v: serde_json::Value = serde_json::from_str(data)?;
        if let Some(err) = v.get("error") {
            let message = err
                .get("message")
                .and_then(|m| m.as_str())
                .map_or_else(|| err.to_string(), ToString::to_string);
            anyhow::bail!("model stream error: {message}");
        }

        let choice = &v["choices"][0];
        let delta = &choice["delta"];

        if let Some(s) = delta.get("content").and_then(|x| x.as_str()) {
            if !s.is_empty() {
                events.push(DriverEvent::TextDelta { text: s.to_string() });
            }
        }

        if let Some(arr) = delta.get("tool_calls").and_then(|x| x.as_array()) {
            for tc in arr {
                let call_index = tc
                    .get("index")
                    .and_then(serde_json::Value::as_u64)
                    .and_then(|i| usize::try_from(i).ok())
                    .unwrap_or(0);
                let function = tc.get("function");
                let field = |v: Option<&serde_json::Value>, key: &str| {
                    v.and_then(|f| f.get(key))
                        .and_then(|x| x.as_str())
                        .map(ToString::to_string)
                };
                events.push(DriverEvent::ToolCallDelta {
                    call_index,
                    id: field(Some(tc), "id"),
                    name: field(function, "name"),
                    arguments_delta: field(function, "arguments"),
                });
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(|x| x.as_str()) {
            self.saw_finish_reason = true;
            if reason == "tool_calls" {
                events.push(DriverEvent::ToolCallsFinished);
            }
        }
        Ok(())
    }
}

fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}
