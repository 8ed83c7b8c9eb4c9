//! Streaming voice-assistant gateway.
//!
//! A client streams utterances over a WebSocket, as text or as recorded
//! speech; the gateway streams the language-model reply back as synthesized
//! speech, sentence by sentence, under per-session flow control.

pub mod app;
pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod flow;
pub mod generation;
pub mod metrics;
pub mod protocol;
pub mod recognition;
pub mod segmenter;
pub mod sender;
pub mod session;
pub mod validation;
pub mod ws;

pub use app::{build_router, AppState};
pub use config::{DeliveryMode, PipelineConfig, ServerConfig};
pub use session::{Pipeline, Session, SessionState};
