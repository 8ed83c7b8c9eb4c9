//! Streaming text generation.
//!
//! The gateway consumes language models only through [`GenerationBackend`]:
//! a reply is a lazy, finite stream of [`ReplyChunk`]s that stops as soon as
//! the caller drops it.

mod client;
mod conversation;
mod roles;
mod sse;

use std::pin::Pin;

use tokio_stream::Stream;

pub use client::{LlmClient, LlmConfig, LlmProvider};
pub use conversation::{ChatMessage, Conversation, TruncateMode};
pub use roles::{RoleBook, DEFAULT_ROLE};
pub use sse::SseDecoder;

/// One item of a streamed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyChunk {
    /// Incremental reply text.
    Content(String),
    /// The backend failed; no further items follow.
    Error(String),
}

pub type ReplyStream = Pin<Box<dyn Stream<Item = ReplyChunk> + Send>>;

/// Capability interface for text generation providers.
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Whether `role` names a persona this backend can speak as.
    fn has_role(&self, role: &str) -> bool {
        let _ = role;
        true
    }

    /// Stream the reply to `utterance`, spoken as `role`, given the prior
    /// user/assistant turns in `context`. Dropping the stream cancels the
    /// underlying request.
    fn stream_reply(&self, role: &str, context: &[ChatMessage], utterance: &str) -> ReplyStream;
}
