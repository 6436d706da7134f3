use std::sync::Arc;

mod model;
mod provider;
mod rig_adapter;

pub use model::{DEFAULT_OLLAMA_ENDPOINT, Model, parse_model_list};
pub use provider::{
    BoxFuture, ExchangeId, LlmProvider, ProviderConfig, ProviderError, ProviderEventStream,
    ProviderMessage, ProviderResult, ProviderStreamHandle, ProviderWorker, Role,
    StreamEventMapped, StreamEventPayload, StreamRequest, make_event_stream,
};
pub use rig_adapter::{RIG_OLLAMA_PROVIDER_ID, RIG_OPENAI_PROVIDER_ID, RigProviderAdapter};

/// Ollama ignores the bearer token, but the OpenAI client refuses to build without one.
pub const OLLAMA_PLACEHOLDER_API_KEY: &str = "ollama";

pub fn create_provider(mut config: ProviderConfig) -> ProviderResult<Arc<dyn LlmProvider>> {
    if config.provider_id.trim().is_empty() {
        config.provider_id = RIG_OLLAMA_PROVIDER_ID.to_string();
    }

    match config.provider_id.as_str() {
        "ollama" => {
            if config.api_key.is_empty() {
                config.api_key = OLLAMA_PLACEHOLDER_API_KEY.to_string();
            }
            if config.endpoint.is_empty() {
                config.endpoint = DEFAULT_OLLAMA_ENDPOINT.to_string();
            }
            Ok(Arc::new(RigProviderAdapter::new(config)?))
        }
        "openai" | "rig-openai" => {
            config.provider_id = RIG_OPENAI_PROVIDER_ID.to_string();
            Ok(Arc::new(RigProviderAdapter::new(config)?))
        }
        _ => Err(ProviderError::UnsupportedProvider {
            stage: "create-provider",
            provider_id: config.provider_id,
        }),
    }
}
