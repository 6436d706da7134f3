use std::sync::Arc;

use llama_link_llm::{
    ExchangeId, LlmProvider, ProviderEventStream, StreamEventMapped, StreamEventPayload,
    StreamRequest,
};

use crate::directory::{DirectoryStatus, ModelDirectory};
use crate::engine::{ConversationEngine, ExchangeOutcome, FoldOutcome, UNTERMINATED_STREAM_DETAILS};
use crate::message::Transcript;

/// Request shaping applied to every exchange.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExchangeOptions {
    pub preamble: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
}

impl ExchangeOptions {
    fn apply(&self, mut request: StreamRequest) -> StreamRequest {
        if let Some(preamble) = &self.preamble {
            request = request.with_preamble(preamble.clone());
        }
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        request
    }
}

/// Observable progress of the active exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// `text` was folded into the assistant message at `index`.
    Fragment { index: usize, text: String },
    Completed,
    /// The exchange ended with the error note `message`.
    Failed { message: String },
}

/// One conversation bound to a provider and a model directory.
///
/// Exchanges run on Tokio: `submit` spawns the provider worker, so it must be
/// called from within a runtime.
pub struct ChatSession {
    provider: Arc<dyn LlmProvider>,
    directory: ModelDirectory,
    engine: ConversationEngine,
    options: ExchangeOptions,
    active_stream: Option<ProviderEventStream>,
}

impl ChatSession {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self::with_options(provider, ExchangeOptions::default())
    }

    pub fn with_options(provider: Arc<dyn LlmProvider>, options: ExchangeOptions) -> Self {
        Self {
            provider,
            directory: ModelDirectory::new(),
            engine: ConversationEngine::new(),
            options,
            active_stream: None,
        }
    }

    pub fn directory(&self) -> &ModelDirectory {
        &self.directory
    }

    pub fn transcript(&self) -> &Transcript {
        self.engine.transcript()
    }

    pub fn selected_model(&self) -> Option<&str> {
        self.directory.selected()
    }

    pub fn is_streaming(&self) -> bool {
        self.active_stream.is_some()
    }

    /// Loads the model directory. Failures leave it empty and are reported
    /// through the returned status only.
    pub async fn load_models(&mut self) -> &DirectoryStatus {
        let _ = self.directory.refresh(self.provider.as_ref()).await;
        self.directory.status()
    }

    /// Switches the active model and starts over with an empty transcript.
    ///
    /// An exchange still streaming is cancelled; anything it sends afterwards is dropped.
    pub fn select_model(&mut self, model_id: impl Into<String>) {
        self.cancel_active_stream();
        self.directory.select(model_id);
        self.engine.reset();
    }

    /// Appends the user turn and opens an exchange for it.
    ///
    /// Returns `None` without touching the transcript when `text` is blank or
    /// no model is selected.
    pub fn submit(&mut self, text: &str) -> Option<ExchangeId> {
        let request = self.engine.submit(text, self.directory.selected())?;
        let exchange_id = request.exchange_id;

        self.cancel_active_stream();

        match self.provider.stream_chat(self.options.apply(request)) {
            Ok(handle) => {
                tokio::spawn(handle.worker);
                self.active_stream = Some(handle.stream);
            }
            Err(error) => {
                tracing::error!(
                    exchange_id = %exchange_id,
                    provider_id = %self.provider.id(),
                    error = %error,
                    "failed to start exchange"
                );
                self.engine.fail(exchange_id, &error.to_string());
            }
        }

        Some(exchange_id)
    }

    /// Waits for the next change the active exchange makes to the transcript.
    ///
    /// Returns `None` when no exchange is streaming.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        loop {
            let stream = self.active_stream.as_mut()?;
            let exchange_id = stream.exchange_id();

            let Some(StreamEventMapped {
                exchange_id: event_exchange_id,
                payload,
            }) = stream.recv().await
            else {
                self.active_stream = None;
                return self
                    .engine
                    .fail(exchange_id, UNTERMINATED_STREAM_DETAILS)
                    .then(|| self.failure_update());
            };

            match payload {
                StreamEventPayload::Delta(text) => {
                    match self.engine.apply_fragment(event_exchange_id, &text) {
                        FoldOutcome::Opened(index) | FoldOutcome::Appended(index) => {
                            return Some(SessionUpdate::Fragment { index, text });
                        }
                        FoldOutcome::Stale => {}
                    }
                }
                StreamEventPayload::Done => {
                    if self.engine.complete(event_exchange_id) {
                        self.active_stream = None;
                        return Some(SessionUpdate::Completed);
                    }
                }
                StreamEventPayload::Error(details) => {
                    if self.engine.fail(event_exchange_id, &details) {
                        self.active_stream = None;
                        return Some(self.failure_update());
                    }
                }
            }
        }
    }

    /// Folds the active exchange to its end.
    pub async fn finish_exchange(&mut self) -> Option<ExchangeOutcome> {
        let stream = self.active_stream.take()?;
        let exchange_id = stream.exchange_id();
        Some(self.engine.fold_stream(exchange_id, stream).await)
    }

    fn failure_update(&self) -> SessionUpdate {
        let message = self
            .engine
            .transcript()
            .last()
            .map(|message| message.content.clone())
            .unwrap_or_default();
        SessionUpdate::Failed { message }
    }

    fn cancel_active_stream(&mut self) {
        if let Some(mut stream) = self.active_stream.take() {
            tracing::debug!(exchange_id = %stream.exchange_id(), "cancelling active exchange");
            stream.cancel();
        }
    }
}
