//! Scripted in-memory provider for driving a chat session without a backend.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use llama_link_llm::{
    BoxFuture, LlmProvider, Model, ProviderError, ProviderResult, ProviderStreamHandle,
    ProviderWorker, StreamEventMapped, StreamEventPayload, StreamRequest, make_event_stream,
};

/// What the provider does for one `stream_chat` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedExchange {
    /// `stream_chat` fails before any stream exists.
    Rejected(String),
    /// The worker sends `payloads` in order. With `hold_open` it keeps the
    /// channel open until the consumer cancels, otherwise it closes right away.
    Events {
        payloads: Vec<StreamEventPayload>,
        hold_open: bool,
    },
}

impl ScriptedExchange {
    fn deltas<'a>(fragments: impl IntoIterator<Item = &'a str>) -> Vec<StreamEventPayload> {
        fragments
            .into_iter()
            .map(|fragment| StreamEventPayload::Delta(fragment.to_string()))
            .collect()
    }

    /// Streams `fragments`, then closes successfully.
    pub fn reply<'a>(fragments: impl IntoIterator<Item = &'a str>) -> Self {
        let mut payloads = Self::deltas(fragments);
        payloads.push(StreamEventPayload::Done);
        Self::Events {
            payloads,
            hold_open: false,
        }
    }

    /// Streams `fragments`, then reports `details` as an error.
    pub fn fail_after<'a>(
        fragments: impl IntoIterator<Item = &'a str>,
        details: impl Into<String>,
    ) -> Self {
        let mut payloads = Self::deltas(fragments);
        payloads.push(StreamEventPayload::Error(details.into()));
        Self::Events {
            payloads,
            hold_open: false,
        }
    }

    /// Streams `fragments` and then stalls without a terminal event.
    pub fn stalled<'a>(fragments: impl IntoIterator<Item = &'a str>) -> Self {
        Self::Events {
            payloads: Self::deltas(fragments),
            hold_open: true,
        }
    }

    /// Streams `fragments` and drops the channel without a terminal event.
    pub fn truncated<'a>(fragments: impl IntoIterator<Item = &'a str>) -> Self {
        Self::Events {
            payloads: Self::deltas(fragments),
            hold_open: false,
        }
    }
}

pub struct ScriptedProvider {
    models: Option<Vec<Model>>,
    exchanges: Mutex<VecDeque<ScriptedExchange>>,
    requests: Mutex<Vec<StreamRequest>>,
}

impl ScriptedProvider {
    /// A provider listing `model_ids`, in order.
    pub fn new<'a>(model_ids: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            models: Some(model_ids.into_iter().map(Model::from_id).collect()),
            exchanges: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A provider whose model listing always fails.
    pub fn unreachable() -> Self {
        Self {
            models: None,
            exchanges: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_exchange(self, exchange: ScriptedExchange) -> Self {
        self.push_exchange(exchange);
        self
    }

    pub fn push_exchange(&self, exchange: ScriptedExchange) {
        self.exchanges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(exchange);
    }

    /// Every request `stream_chat` received, oldest first.
    pub fn requests(&self) -> Vec<StreamRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl LlmProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    fn name(&self) -> &str {
        "Scripted"
    }

    fn fetch_models<'a>(&'a self) -> BoxFuture<'a, ProviderResult<Vec<Model>>> {
        Box::pin(async move {
            self.models
                .clone()
                .ok_or_else(|| ProviderError::ModelFetchStatus {
                    stage: "scripted-fetch-models",
                    status: 503,
                    body: "backend unreachable".to_string(),
                })
        })
    }

    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        let exchange_id = request.exchange_id;
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        let next = self
            .exchanges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let (payloads, hold_open) = match next {
            Some(ScriptedExchange::Events {
                payloads,
                hold_open,
            }) => (payloads, hold_open),
            Some(ScriptedExchange::Rejected(message)) => {
                return Err(ProviderError::BuildHttpRequestBody {
                    stage: "scripted-stream-chat",
                    message,
                });
            }
            None => {
                return Err(ProviderError::BuildHttpRequestBody {
                    stage: "scripted-stream-chat",
                    message: "no scripted exchange left".to_string(),
                });
            }
        };

        let (event_tx, stream, cancel_rx) = make_event_stream(exchange_id);
        let worker: ProviderWorker = Box::pin(async move {
            for payload in payloads {
                if event_tx
                    .send(StreamEventMapped {
                        exchange_id,
                        payload,
                    })
                    .is_err()
                {
                    return;
                }
            }

            if hold_open {
                let _ = cancel_rx.await;
            }
        });

        Ok(ProviderStreamHandle { stream, worker })
    }
}
