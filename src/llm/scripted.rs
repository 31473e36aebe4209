//! Offline provider used when no API key is configured

use super::{CompletionRequest, FrameStream, LlmError, ModelProvider};
use crate::stream::{encode_frame, StreamEvent};
use async_trait::async_trait;
use futures::stream;

const OFFLINE_REPLY: &str =
    "This is a mock response because no valid OpenAI API key was provided.";

/// Streams a fixed reply, one word per frame
pub struct ScriptedProvider {
    model_id: String,
    reply: String,
}

impl ScriptedProvider {
    pub fn new(model_id: impl Into<String>, reply: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            reply: reply.into(),
        }
    }

    pub fn offline(model_id: impl Into<String>) -> Self {
        Self::new(model_id, OFFLINE_REPLY)
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn stream(&self, _request: &CompletionRequest) -> Result<FrameStream, LlmError> {
        let chunks: Vec<Result<Vec<u8>, LlmError>> = self
            .reply
            .split_inclusive(' ')
            .map(|word| encode_frame(&StreamEvent::content(word)))
            .chain(std::iter::once(encode_frame(&StreamEvent::Done)))
            .map(|frame| Ok(frame.into_bytes()))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
