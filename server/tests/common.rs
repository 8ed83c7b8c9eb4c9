//! Common utilities for integration tests: scripted backends and an
//! in-memory session harness.

#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use llm_core::{ChatMessage, GenerationBackend, ReplyChunk, ReplyStream, RoleBook};
use stt_core::FixedTranscriptStt;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::ReceiverStream;
use tts_core::SynthesisBackend;
use voice_gateway::{
    auth::{Credentials, KeyRecord, KeyRegistry},
    build_router, AppState, ServerConfig,
    error::TransportError,
    flow::FlowController,
    metrics::GatewayMetrics,
    protocol::{Inbound, Outbound, ServerEvent},
    Pipeline, PipelineConfig, Session, SessionState,
};

/// What the generation backend was asked for.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub role: String,
    pub context: Vec<ChatMessage>,
    pub utterance: String,
}

/// Generation backend replaying a fixed script, or echoing the utterance.
pub struct ScriptedLlm {
    script: Vec<ReplyChunk>,
    echo: bool,
    hang: bool,
    crash: bool,
    delay: Duration,
    roles: RoleBook,
    calls: AtomicUsize,
    seen: Mutex<Vec<SeenRequest>>,
}

impl ScriptedLlm {
    pub fn new(parts: &[&str]) -> Self {
        Self {
            script: parts
                .iter()
                .map(|p| ReplyChunk::Content(p.to_string()))
                .collect(),
            echo: false,
            hang: false,
            crash: false,
            delay: Duration::ZERO,
            roles: RoleBook::builtin(),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Reply with the utterance itself.
    pub fn echo() -> Self {
        Self {
            echo: true,
            ..Self::new(&[])
        }
    }

    /// Never finish after the scripted fragments.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Panic inside the reply task.
    pub fn crashing() -> Self {
        Self {
            crash: true,
            ..Self::new(&[])
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn then_fail(mut self, message: &str) -> Self {
        self.script.push(ReplyChunk::Error(message.to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

impl GenerationBackend for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    fn stream_reply(&self, role: &str, context: &[ChatMessage], utterance: &str) -> ReplyStream {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(SeenRequest {
            role: role.to_string(),
            context: context.to_vec(),
            utterance: utterance.to_string(),
        });
        if self.crash {
            panic!("scripted generation backend crashed");
        }

        let chunks = if self.echo {
            vec![ReplyChunk::Content(utterance.to_string())]
        } else {
            self.script.clone()
        };
        let delay = self.delay;
        let items = stream::iter(chunks).then(move |chunk| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            chunk
        });
        if self.hang {
            return Box::pin(items.chain(stream::pending()));
        }
        Box::pin(items)
    }
}

/// Synthesis backend whose audio is the sentence's UTF-8 bytes.
#[derive(Default)]
pub struct RecordingTts {
    fail_containing: Option<String>,
    calls: Mutex<Vec<String>>,
}

impl RecordingTts {
    pub fn failing_on(needle: &str) -> Self {
        Self {
            fail_containing: Some(needle.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SynthesisBackend for RecordingTts {
    fn name(&self) -> &str {
        "recording"
    }

    async fn synthesize(&self, text: &str) -> anyhow::Result<Vec<u8>> {
        self.calls.lock().unwrap().push(text.to_string());
        if let Some(needle) = &self.fail_containing {
            if text.contains(needle.as_str()) {
                anyhow::bail!("voice unavailable for this sentence");
            }
        }
        Ok(text.as_bytes().to_vec())
    }
}

fn record(device_id: &str, status: &str, permissions: &[&str]) -> KeyRecord {
    KeyRecord {
        device_id: device_id.to_string(),
        api_key: None,
        status: status.to_string(),
        permissions: permissions.iter().map(|p| p.to_string()).collect(),
    }
}

/// `device-1` is active with `chat`, `device-2` is disabled, `device-3` has
/// no permissions, `device-4` is active but needs the api key `key-4`.
pub fn registry() -> KeyRegistry {
    let mut keyed = record("device-4", "active", &["chat"]);
    keyed.api_key = Some("key-4".to_string());
    KeyRegistry::from_records([
        record("device-1", "active", &["chat"]),
        record("device-2", "disabled", &["chat"]),
        record("device-3", "active", &[]),
        keyed,
    ])
}

pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        unit_bytes: 8,
        sender_poll: Duration::from_millis(5),
        llm_timeout: Duration::from_secs(2),
        tts_timeout: Duration::from_secs(2),
        auth_timeout: Duration::from_millis(300),
        ..PipelineConfig::default()
    }
}

pub fn pipeline(
    llm: Arc<ScriptedLlm>,
    tts: Arc<RecordingTts>,
    config: PipelineConfig,
) -> Arc<Pipeline> {
    Arc::new(Pipeline {
        auth: Arc::new(registry()),
        generation: llm,
        synthesis: tts,
        recognition: None,
        config,
        metrics: Arc::new(GatewayMetrics::new()),
    })
}

/// Like [`pipeline`], with a recognizer that hears `transcript` in any
/// non-empty audio.
pub fn speech_pipeline(
    llm: Arc<ScriptedLlm>,
    tts: Arc<RecordingTts>,
    config: PipelineConfig,
    transcript: &str,
) -> Arc<Pipeline> {
    Arc::new(Pipeline {
        auth: Arc::new(registry()),
        generation: llm,
        synthesis: tts,
        recognition: Some(Arc::new(FixedTranscriptStt::new(transcript))),
        config,
        metrics: Arc::new(GatewayMetrics::new()),
    })
}

/// The HTTP router over `pipeline` with default server settings.
pub fn create_test_app(pipeline: Arc<Pipeline>) -> axum::Router {
    build_router(AppState::new(pipeline), &ServerConfig::from_lookup(|_| None))
        .expect("default router configuration is valid")
}

/// Router over an echoing generation backend.
pub fn echo_app() -> axum::Router {
    create_test_app(pipeline(
        Arc::new(ScriptedLlm::echo()),
        Arc::new(RecordingTts::default()),
        test_config(),
    ))
}

/// A session driven through in-memory channels.
pub struct Harness {
    pub inbound: mpsc::Sender<Inbound>,
    pub outbound: mpsc::Receiver<Outbound>,
    pub events: Vec<ServerEvent>,
    pub task: JoinHandle<SessionState>,
    flow: Arc<FlowController>,
}

pub fn start_session(pipeline: Arc<Pipeline>, device_id: Option<&str>) -> Harness {
    start_session_with(pipeline, device_id.map(Credentials::device))
}

pub fn start_session_with(pipeline: Arc<Pipeline>, credentials: Option<Credentials>) -> Harness {
    let (in_tx, in_rx) = mpsc::channel(16);
    let (out_tx, out_rx) = mpsc::channel(pipeline.config.outbound_queue);
    let session = Session::new(pipeline);
    let flow = session.flow();
    let task = tokio::spawn(session.run(credentials, ReceiverStream::new(in_rx), out_tx));
    Harness {
        inbound: in_tx,
        outbound: out_rx,
        events: Vec::new(),
        task,
        flow,
    }
}

impl Harness {
    pub async fn send_raw(&self, raw: &str) {
        self.inbound
            .send(Inbound::Text(raw.to_string()))
            .await
            .expect("session stopped reading");
    }

    pub async fn send_json(&self, value: serde_json::Value) {
        self.send_raw(&value.to_string()).await;
    }

    pub async fn say(&self, text: &str) {
        self.send_json(serde_json::json!({ "text": text })).await;
    }

    pub async fn ack(&self) {
        self.say("ok").await;
    }

    /// Send one recorded utterance as a binary frame.
    pub async fn speak(&self, audio: &[u8]) {
        self.inbound
            .send(Inbound::Binary(audio.to_vec()))
            .await
            .expect("session stopped reading");
    }

    /// Next frame the transport writer would put on the wire. Audio queued
    /// before an abort is skipped, as the WebSocket writer does.
    pub async fn next_within(&mut self, wait: Duration) -> Option<Outbound> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let frame = tokio::time::timeout_at(deadline, self.outbound.recv())
                .await
                .ok()
                .flatten()?;
            match &frame {
                Outbound::Audio(unit) if !self.flow.is_current(unit) => continue,
                _ => return Some(frame),
            }
        }
    }

    /// Audio bytes of the next frame, if it is audio.
    pub async fn next_audio(&mut self, wait: Duration) -> Option<Vec<u8>> {
        match self.next_within(wait).await? {
            Outbound::Audio(unit) => Some(unit.bytes),
            _ => None,
        }
    }

    /// Receive audio until the line stays quiet, acknowledging every unit
    /// when `ack` is set. Events are kept in `self.events`.
    pub async fn collect_audio(&mut self, ack: bool) -> Vec<u8> {
        let mut audio = Vec::new();
        if ack {
            self.ack().await;
        }
        while let Some(frame) = self.next_within(Duration::from_millis(400)).await {
            match frame {
                Outbound::Audio(unit) => {
                    audio.extend(unit.bytes);
                    if ack {
                        self.ack().await;
                    }
                }
                Outbound::Event(event) => self.events.push(event),
                Outbound::Close { .. } => break,
            }
        }
        audio
    }

    /// Wait for the next event, skipping audio.
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        if !self.events.is_empty() {
            return Some(self.events.remove(0));
        }
        while let Some(frame) = self.next_within(Duration::from_secs(2)).await {
            if let Outbound::Event(event) = frame {
                return Some(event);
            }
        }
        None
    }

    pub async fn close(self) -> SessionState {
        let _ = self
            .inbound
            .send(Inbound::Closed(TransportError::Closed))
            .await;
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("session did not shut down")
            .expect("session task panicked")
    }
}
