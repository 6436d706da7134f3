#![deny(unsafe_code)]

//! Conversation core of the chat client: the transcript, the fold that turns
//! streamed fragments into assistant turns, and the model directory that
//! decides which model an exchange talks to.

pub mod directory;
pub mod engine;
pub mod error;
/// Transcript entries and the append-only transcript itself.
pub mod message;
pub mod session;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use directory::{DirectoryStatus, ModelDirectory};
pub use engine::{
    ConversationEngine, ERROR_PREFIX, EventOutcome, ExchangeOutcome, FoldOutcome, StreamCursor,
    UNTERMINATED_STREAM_DETAILS,
};
pub use error::{ChatError, ChatResult};
pub use message::{Message, Role, Transcript};
pub use session::{ChatSession, ExchangeOptions, SessionUpdate};
