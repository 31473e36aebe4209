//! Model provider abstraction
//!
//! A provider turns a completion request into a byte stream of protocol
//! frames (see [`crate::stream`]).

mod error;
mod openai;
mod registry;
mod scripted;
mod types;

pub use error::LlmError;
pub use openai::OpenAiProvider;
pub use registry::{build_provider, LlmConfig};
pub use scripted::ScriptedProvider;
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;

/// Common interface for streaming model providers
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Start a streaming completion.
    ///
    /// Errors returned here happen before any frame was produced; failures
    /// after that point arrive inside the stream.
    async fn stream(&self, request: &CompletionRequest) -> Result<FrameStream, LlmError>;

    /// Default model identifier
    fn model_id(&self) -> &str;
}

#[async_trait]
impl<T: ModelProvider + ?Sized> ModelProvider for Arc<T> {
    async fn stream(&self, request: &CompletionRequest) -> Result<FrameStream, LlmError> {
        (**self).stream(request).await
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

/// Logging wrapper for providers
pub struct LoggingProvider {
    inner: Arc<dyn ModelProvider>,
    model_id: String,
}

impl LoggingProvider {
    pub fn new(inner: Arc<dyn ModelProvider>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl ModelProvider for LoggingProvider {
    async fn stream(&self, request: &CompletionRequest) -> Result<FrameStream, LlmError> {
        let start = std::time::Instant::now();
        let result = self.inner.stream(request).await;
        let duration = start.elapsed();
        let model = request.model.as_deref().unwrap_or(&self.model_id);

        match &result {
            Ok(_) => {
                tracing::info!(
                    model = %model,
                    duration_ms = %duration.as_millis(),
                    messages = request.messages.len(),
                    "Model stream opened"
                );
            }
            Err(e) => {
                tracing::error!(
                    model = %model,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    kind = ?e.kind,
                    "Model stream failed to open"
                );
            }
        }

        result
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
