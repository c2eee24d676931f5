//! LLM integration.
//!
//! Scripting talks to the [`LlmProvider`] trait only. The OpenAI backend is
//! built on rig-core and bridged through [`RigAdapter`].

pub mod provider;
mod rig_adapter;

pub use provider::*;
pub use rig_adapter::RigAdapter;

use std::sync::Arc;

use rig::client::CompletionClient;
use secrecy::ExposeSecret;

use crate::config::LlmSettings;
use crate::error::LlmError;

/// Create an LLM provider from settings.
pub fn create_provider(settings: &LlmSettings) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(settings.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("Failed to create OpenAI client: {}", e),
            }
        })?;

    let model = client.completion_model(&settings.model);
    tracing::info!("Using OpenAI (model: {})", settings.model);
    Ok(Arc::new(RigAdapter::new(model, &settings.model)))
}
