use futures::{Stream, StreamExt};
use llama_link_llm::{ExchangeId, StreamEventMapped, StreamEventPayload, StreamRequest};

use crate::message::{Message, Transcript};

/// Prefix of the assistant message appended when an exchange fails.
pub const ERROR_PREFIX: &str = "Error: ";

pub const UNTERMINATED_STREAM_DETAILS: &str = "provider stream ended before a terminal event";

/// Per-exchange pointer to the assistant message receiving fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamCursor {
    pub exchange_id: ExchangeId,
    pub open_message: Option<usize>,
}

impl StreamCursor {
    fn fresh(exchange_id: ExchangeId) -> Self {
        Self {
            exchange_id,
            open_message: None,
        }
    }
}

/// Result of folding one fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldOutcome {
    /// A new assistant message was appended at this index.
    Opened(usize),
    /// The fragment grew the assistant message at this index.
    Appended(usize),
    /// The fragment belongs to an exchange that is no longer current.
    Stale,
}

/// Result of applying one mapped provider event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Folded(FoldOutcome),
    Completed,
    Failed,
    Stale,
}

/// How a whole exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOutcome {
    Completed,
    Failed,
    /// A newer submission or a reset took over before the exchange finished.
    Superseded,
}

/// Owns the transcript and folds streamed fragments into it.
///
/// Only the exchange whose id matches the current cursor may touch the
/// transcript; anything else is dropped as stale.
#[derive(Debug, Default)]
pub struct ConversationEngine {
    transcript: Transcript,
    cursor: Option<StreamCursor>,
    last_exchange_id: ExchangeId,
}

impl ConversationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn cursor(&self) -> Option<StreamCursor> {
        self.cursor
    }

    pub fn is_streaming(&self) -> bool {
        self.cursor.is_some()
    }

    pub fn is_current(&self, exchange_id: ExchangeId) -> bool {
        self.cursor.is_some_and(|cursor| cursor.exchange_id == exchange_id)
    }

    /// Records a user turn and opens a new exchange for it.
    ///
    /// Blank text or a missing model is a silent no-op returning `None`.
    /// Otherwise the trimmed text is appended and the returned request carries
    /// the full transcript, including the new user message.
    pub fn submit(&mut self, text: &str, model_id: Option<&str>) -> Option<StreamRequest> {
        let content = text.trim();
        if content.is_empty() {
            return None;
        }
        let model_id = model_id.map(str::trim).filter(|id| !id.is_empty())?;

        if let Some(previous) = self.cursor {
            tracing::debug!(
                exchange_id = %previous.exchange_id,
                "superseding exchange that was still streaming"
            );
        }

        self.transcript.push(Message::user(content));

        let exchange_id = self.last_exchange_id.next();
        self.last_exchange_id = exchange_id;
        self.cursor = Some(StreamCursor::fresh(exchange_id));

        tracing::debug!(
            exchange_id = %exchange_id,
            model_id = %model_id,
            message_count = self.transcript.len(),
            "opened exchange"
        );

        Some(StreamRequest::new(
            exchange_id,
            model_id,
            self.transcript.to_provider_messages(),
        ))
    }

    /// Folds one fragment into the transcript.
    pub fn apply_fragment(&mut self, exchange_id: ExchangeId, fragment: &str) -> FoldOutcome {
        let Some(cursor) = self.cursor.as_mut() else {
            return FoldOutcome::Stale;
        };
        if cursor.exchange_id != exchange_id {
            return FoldOutcome::Stale;
        }

        if let Some(index) = cursor.open_message
            && self.transcript.extend_trailing_assistant(index, fragment)
        {
            return FoldOutcome::Appended(index);
        }

        // No open message yet, or it is no longer the trailing assistant turn.
        let index = self.transcript.push(Message::assistant(fragment));
        cursor.open_message = Some(index);
        FoldOutcome::Opened(index)
    }

    /// Closes the exchange after the provider finished successfully.
    pub fn complete(&mut self, exchange_id: ExchangeId) -> bool {
        if !self.is_current(exchange_id) {
            return false;
        }

        self.cursor = None;
        tracing::debug!(exchange_id = %exchange_id, "exchange completed");
        true
    }

    /// Closes the exchange with an error note.
    ///
    /// The note is always a new assistant message; content streamed so far stays as it is.
    pub fn fail(&mut self, exchange_id: ExchangeId, details: &str) -> bool {
        if !self.is_current(exchange_id) {
            return false;
        }

        tracing::warn!(exchange_id = %exchange_id, details = %details, "exchange failed");

        self.transcript.push(Message::assistant(format!("{ERROR_PREFIX}{details}")));
        self.cursor = None;
        true
    }

    pub fn apply_event(&mut self, event: StreamEventMapped) -> EventOutcome {
        let exchange_id = event.exchange_id;
        if !self.is_current(exchange_id) {
            tracing::debug!(exchange_id = %exchange_id, "discarding stale stream event");
            return EventOutcome::Stale;
        }

        match event.payload {
            StreamEventPayload::Delta(fragment) => {
                EventOutcome::Folded(self.apply_fragment(exchange_id, &fragment))
            }
            StreamEventPayload::Done => {
                self.complete(exchange_id);
                EventOutcome::Completed
            }
            StreamEventPayload::Error(details) => {
                self.fail(exchange_id, &details);
                EventOutcome::Failed
            }
        }
    }

    /// Drives one exchange to its end by folding every event of `events`.
    ///
    /// Events tagged with another exchange are skipped. A stream that closes
    /// without `Done` or `Error` counts as a failure.
    pub async fn fold_stream<S>(&mut self, exchange_id: ExchangeId, events: S) -> ExchangeOutcome
    where
        S: Stream<Item = StreamEventMapped>,
    {
        let mut events = std::pin::pin!(events);

        while self.is_current(exchange_id) {
            let Some(event) = events.next().await else {
                self.fail(exchange_id, UNTERMINATED_STREAM_DETAILS);
                return ExchangeOutcome::Failed;
            };

            if event.exchange_id != exchange_id {
                continue;
            }

            match self.apply_event(event) {
                EventOutcome::Completed => return ExchangeOutcome::Completed,
                EventOutcome::Failed => return ExchangeOutcome::Failed,
                EventOutcome::Folded(_) | EventOutcome::Stale => {}
            }
        }

        ExchangeOutcome::Superseded
    }

    /// Drops the whole history and detaches any in-flight exchange.
    pub fn reset(&mut self) {
        if let Some(cursor) = self.cursor.take() {
            tracing::debug!(exchange_id = %cursor.exchange_id, "detached exchange on reset");
        }
        self.transcript.clear();
    }
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;
    use crate::message::Role;

    fn engine_with_exchange(text: &str) -> (ConversationEngine, ExchangeId) {
        let mut engine = ConversationEngine::new();
        let request = engine.submit(text, Some("llama-7b")).unwrap();
        (engine, request.exchange_id)
    }

    #[test]
    fn blank_input_or_missing_model_is_a_no_op() {
        let mut engine = ConversationEngine::new();

        assert!(engine.submit("", Some("llama-7b")).is_none());
        assert!(engine.submit("   ", Some("llama-7b")).is_none());
        assert!(engine.submit("hi", None).is_none());
        assert!(engine.submit("hi", Some("  ")).is_none());

        assert!(engine.transcript().is_empty());
        assert!(!engine.is_streaming());
    }

    #[test]
    fn submit_appends_trimmed_user_turn_before_streaming() {
        let mut engine = ConversationEngine::new();

        let request = engine.submit("  hi \n", Some("llama-7b")).unwrap();

        assert_eq!(engine.transcript().messages(), [Message::user("hi")]);
        assert_eq!(request.model_id, "llama-7b");
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].content, "hi");
        assert_eq!(
            engine.cursor(),
            Some(StreamCursor {
                exchange_id: request.exchange_id,
                open_message: None,
            })
        );
    }

    #[test]
    fn request_snapshot_includes_prior_assistant_turns() {
        let (mut engine, first) = engine_with_exchange("hi");
        engine.apply_fragment(first, "Hello!");
        engine.complete(first);

        let request = engine.submit("again", Some("llama-7b")).unwrap();

        let contents = request
            .messages
            .iter()
            .map(|message| message.content.as_str())
            .collect::<Vec<_>>();
        assert_eq!(contents, ["hi", "Hello!", "again"]);
        assert_ne!(request.exchange_id, first);
    }

    #[test]
    fn fragments_fold_into_one_trailing_assistant_message() {
        let (mut engine, exchange_id) = engine_with_exchange("hi");

        assert_eq!(engine.apply_fragment(exchange_id, "Hel"), FoldOutcome::Opened(1));
        assert_eq!(engine.apply_fragment(exchange_id, "lo"), FoldOutcome::Appended(1));
        assert_eq!(engine.apply_fragment(exchange_id, "!"), FoldOutcome::Appended(1));
        assert!(engine.complete(exchange_id));

        assert_eq!(
            engine.transcript().messages(),
            [Message::user("hi"), Message::assistant("Hello!")]
        );
        assert!(!engine.is_streaming());
    }

    #[test]
    fn error_after_partial_content_is_a_separate_message() {
        let (mut engine, exchange_id) = engine_with_exchange("hi");
        engine.apply_fragment(exchange_id, "Hel");

        assert!(engine.fail(exchange_id, "connection reset"));

        assert_eq!(
            engine.transcript().messages(),
            [
                Message::user("hi"),
                Message::assistant("Hel"),
                Message::assistant("Error: connection reset"),
            ]
        );
    }

    #[test]
    fn cursor_reopens_when_its_message_is_no_longer_trailing() {
        let (mut engine, exchange_id) = engine_with_exchange("hi");
        engine.apply_fragment(exchange_id, "Hel");
        engine.transcript.push(Message::assistant("interleaved"));

        assert_eq!(engine.apply_fragment(exchange_id, "lo!"), FoldOutcome::Opened(3));
        assert_eq!(engine.transcript().get(1), Some(&Message::assistant("Hel")));
        assert_eq!(engine.transcript().last(), Some(&Message::assistant("lo!")));
    }

    #[test]
    fn superseded_exchange_cannot_touch_the_transcript() {
        let (mut engine, first) = engine_with_exchange("hi");
        engine.apply_fragment(first, "Hel");
        let second = engine.submit("again", Some("llama-7b")).unwrap().exchange_id;

        assert_eq!(engine.apply_fragment(first, "lo!"), FoldOutcome::Stale);
        assert!(!engine.fail(first, "timeout"));
        assert!(!engine.complete(first));
        assert_eq!(
            engine.apply_event(StreamEventMapped::done(first)),
            EventOutcome::Stale
        );

        assert_eq!(engine.apply_fragment(second, "Sure"), FoldOutcome::Opened(3));
        assert_eq!(engine.transcript().len(), 4);
        assert_eq!(engine.transcript().get(1), Some(&Message::assistant("Hel")));
    }

    #[test]
    fn reset_clears_history_and_detaches_the_exchange() {
        let (mut engine, exchange_id) = engine_with_exchange("hi");
        engine.apply_fragment(exchange_id, "Hel");

        engine.reset();

        assert!(engine.transcript().is_empty());
        assert_eq!(engine.apply_fragment(exchange_id, "lo!"), FoldOutcome::Stale);
        assert!(!engine.fail(exchange_id, "timeout"));
        assert!(engine.transcript().is_empty());
    }

    #[tokio::test]
    async fn fold_stream_concatenates_fragments_in_arrival_order() {
        let (mut engine, exchange_id) = engine_with_exchange("hi");
        let events = stream::iter(vec![
            StreamEventMapped::delta(exchange_id, "Hel"),
            StreamEventMapped::delta(exchange_id, "lo"),
            StreamEventMapped::delta(exchange_id, "!"),
            StreamEventMapped::done(exchange_id),
        ]);

        let outcome = engine.fold_stream(exchange_id, events).await;

        assert_eq!(outcome, ExchangeOutcome::Completed);
        assert_eq!(engine.transcript().count_role(Role::Assistant), 1);
        assert_eq!(engine.transcript().last(), Some(&Message::assistant("Hello!")));
    }

    #[tokio::test]
    async fn fold_stream_skips_events_for_other_exchanges() {
        let (mut engine, exchange_id) = engine_with_exchange("hi");
        let stray = ExchangeId::new(99);
        let events = stream::iter(vec![
            StreamEventMapped::delta(exchange_id, "Hel"),
            StreamEventMapped::delta(stray, "garbage"),
            StreamEventMapped::error(stray, "not ours"),
            StreamEventMapped::delta(exchange_id, "lo!"),
            StreamEventMapped::done(exchange_id),
        ]);

        let outcome = engine.fold_stream(exchange_id, events).await;

        assert_eq!(outcome, ExchangeOutcome::Completed);
        assert_eq!(
            engine.transcript().messages(),
            [Message::user("hi"), Message::assistant("Hello!")]
        );
    }

    #[tokio::test]
    async fn fold_stream_turns_error_event_into_error_message() {
        let (mut engine, exchange_id) = engine_with_exchange("again");
        let events = stream::iter(vec![StreamEventMapped::error(exchange_id, "timeout")]);

        let outcome = engine.fold_stream(exchange_id, events).await;

        assert_eq!(outcome, ExchangeOutcome::Failed);
        assert_eq!(
            engine.transcript().last(),
            Some(&Message::assistant("Error: timeout"))
        );
    }

    #[tokio::test]
    async fn fold_stream_without_terminal_event_fails() {
        let (mut engine, exchange_id) = engine_with_exchange("hi");
        let events = stream::iter(vec![StreamEventMapped::delta(exchange_id, "Hel")]);

        let outcome = engine.fold_stream(exchange_id, events).await;

        assert_eq!(outcome, ExchangeOutcome::Failed);
        assert_eq!(
            engine.transcript().messages(),
            [
                Message::user("hi"),
                Message::assistant("Hel"),
                Message::assistant(format!("{ERROR_PREFIX}{UNTERMINATED_STREAM_DETAILS}")),
            ]
        );
    }

    #[tokio::test]
    async fn fold_stream_reports_superseded_exchange() {
        let (mut engine, first) = engine_with_exchange("hi");
        engine.submit("again", Some("llama-7b"));

        let outcome = engine
            .fold_stream(first, stream::iter(vec![StreamEventMapped::done(first)]))
            .await;

        assert_eq!(outcome, ExchangeOutcome::Superseded);
        assert_eq!(engine.transcript().len(), 2);
    }
}
