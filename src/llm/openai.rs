//! OpenAI chat completions provider (streaming)
//!
//! OpenAI's own event stream is re-framed into our frame format so the
//! session engine only ever decodes one protocol.

use super::{ChatRole, CompletionRequest, FrameStream, LlmError, ModelProvider};
use crate::stream::{encode_frame, FrameBuffer, StreamEvent};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/chat/completions";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DONE_SENTINEL: &str = "[DONE]";

/// Streaming OpenAI chat completions client
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model_id: String,
}

impl OpenAiProvider {
    pub fn new(
        api_key: String,
        model_id: impl Into<String>,
        base_url: Option<&str>,
    ) -> Result<Self, LlmError> {
        // No overall timeout: exchanges are long-lived and bounded by the runtime
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| LlmError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.unwrap_or(DEFAULT_BASE_URL).to_string(),
            model_id: model_id.into(),
        })
    }

    fn translate_request(&self, request: &CompletionRequest) -> OpenAiRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system.is_empty() {
            messages.push(OpenAiMessage {
                role: ChatRole::System,
                content: request.system.clone(),
            });
        }
        messages.extend(request.messages.iter().map(|m| OpenAiMessage {
            role: m.role,
            content: m.content.clone(),
        }));

        OpenAiRequest {
            model: request
                .model
                .clone()
                .unwrap_or_else(|| self.model_id.clone()),
            messages,
            stream: true,
            max_tokens: request.max_tokens,
        }
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    async fn stream(&self, request: &CompletionRequest) -> Result<FrameStream, LlmError> {
        let body = self.translate_request(request);

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    LlmError::network(format!("Connection failed: {e}"))
                } else {
                    LlmError::unknown(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<OpenAiErrorResponse>(&body)
                .map_or(body, |r| r.error.message);
            return Err(LlmError::from_status(status.as_u16(), &message));
        }

        Ok(reframe(response.bytes_stream()))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Re-frame an OpenAI event stream chunk by chunk
fn reframe<S, B>(upstream: S) -> FrameStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]>,
{
    let mut frames = FrameBuffer::new();
    Box::pin(upstream.map(move |chunk| match chunk {
        Ok(bytes) => Ok(frames
            .push(bytes.as_ref())
            .iter()
            .filter_map(|payload| reframe_payload(payload))
            .collect::<String>()
            .into_bytes()),
        Err(e) => Err(LlmError::network(format!("Stream interrupted: {e}"))),
    }))
}

/// Translate one OpenAI payload into a frame, if it carries anything
fn reframe_payload(payload: &str) -> Option<String> {
    if payload.trim() == DONE_SENTINEL {
        return Some(encode_frame(&StreamEvent::Done));
    }
    if let Ok(error) = serde_json::from_str::<OpenAiErrorResponse>(payload) {
        return Some(encode_frame(&StreamEvent::error(error.error.message)));
    }

    match serde_json::from_str::<OpenAiChunk>(payload) {
        Ok(chunk) => {
            let text: String = chunk
                .choices
                .into_iter()
                .filter_map(|c| c.delta.content)
                .collect();
            (!text.is_empty()).then(|| encode_frame(&StreamEvent::content(text)))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Skipping unparseable OpenAI chunk");
            None
        }
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: ChatRole,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiChunk {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    #[serde(default)]
    delta: OpenAiDelta,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorResponse {
    error: OpenAiErrorBody,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorBody {
    message: String,
}
