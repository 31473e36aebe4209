//! Provider selection from configuration

use super::{LoggingProvider, ModelProvider, OpenAiProvider, ScriptedProvider};
use std::sync::Arc;

const DEFAULT_MODEL: &str = "gpt-4o";
const PLACEHOLDER_KEY: &str = "your-api-key-here";

/// Configuration for the model provider
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub openai_api_key: Option<String>,
    pub base_url: Option<String>,
    pub default_model: Option<String>,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            base_url: std::env::var("OPENAI_BASE_URL").ok(),
            default_model: std::env::var("DEFAULT_MODEL").ok(),
        }
    }

    pub fn model(&self) -> &str {
        self.default_model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// The API key, unless missing, blank, or the template placeholder
    fn usable_key(&self) -> Option<&str> {
        self.openai_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty() && *k != PLACEHOLDER_KEY)
    }
}

/// Build the provider for this configuration, wrapped with logging.
///
/// Falls back to the offline scripted provider when no usable key exists.
pub fn build_provider(config: &LlmConfig) -> Arc<dyn ModelProvider> {
    let model = config.model();

    let inner: Arc<dyn ModelProvider> = match config.usable_key() {
        Some(key) => match OpenAiProvider::new(key.to_string(), model, config.base_url.as_deref()) {
            Ok(provider) => Arc::new(provider),
            Err(e) => {
                tracing::error!(error = %e, "Failed to initialize OpenAI provider, using offline replies");
                Arc::new(ScriptedProvider::offline(model))
            }
        },
        None => {
            tracing::warn!("No valid OPENAI_API_KEY configured. Using offline replies.");
            Arc::new(ScriptedProvider::offline(model))
        }
    };

    Arc::new(LoggingProvider::new(inner))
}
