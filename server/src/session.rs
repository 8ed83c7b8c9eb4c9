//! One client connection, from authentication to teardown.
//!
//! A session owns its flow controller, its audio sender task and at most one
//! in-flight turn. A turn starts from a text utterance or, when recognition
//! is configured, from a binary frame of recorded speech. Nothing here is
//! shared between sessions except the read-only [`Pipeline`].

use std::{collections::HashMap, sync::Arc};

use futures_util::{Stream, StreamExt};
use llm_core::{Conversation, GenerationBackend, DEFAULT_ROLE};
use stt_core::RecognitionBackend;
use tokio::{
    sync::mpsc,
    task::{JoinError, JoinHandle},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use tts_core::SynthesisBackend;
use uuid::Uuid;

use crate::{
    auth::{Authenticator, Credentials, Identity},
    config::PipelineConfig,
    dispatcher::SynthesisDispatcher,
    error::{close_code, AuthError, NoticeKind, ProtocolError, RecognitionError, TransportError},
    flow::FlowController,
    generation::{GenerationConsumer, GenerationOutcome, Utterance},
    metrics::GatewayMetrics,
    protocol::{parse_frame, parse_identity_frame, ClientMessage, Inbound, Outbound, ServerEvent},
    recognition::Recognizer,
    sender::AudioSender,
};

/// Collaborators and settings shared by every session.
pub struct Pipeline {
    pub auth: Arc<dyn Authenticator>,
    pub generation: Arc<dyn GenerationBackend>,
    pub synthesis: Arc<dyn SynthesisBackend>,
    /// Speech input is refused when unset.
    pub recognition: Option<Arc<dyn RecognitionBackend>>,
    pub config: PipelineConfig,
    pub metrics: Arc<GatewayMetrics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Active,
    Closing,
    Closed,
}

enum AuthFailure {
    Refused(AuthError),
    Disconnected(TransportError),
}

impl From<AuthError> for AuthFailure {
    fn from(err: AuthError) -> Self {
        AuthFailure::Refused(err)
    }
}

/// What starts a turn.
enum TurnInput {
    Text(String),
    Speech {
        audio: Vec<u8>,
        recognizer: Arc<Recognizer>,
    },
}

/// How a turn ended.
enum TurnResult {
    Replied {
        prompt: String,
        outcome: GenerationOutcome,
    },
    Unheard(RecognitionError),
    /// Cancelled before there was a prompt to answer.
    Interrupted,
}

/// The turn currently in flight.
struct ActiveReply {
    role: String,
    cancel: CancellationToken,
    handle: JoinHandle<TurnResult>,
}

pub struct Session {
    id: Uuid,
    pipeline: Arc<Pipeline>,
    state: SessionState,
    identity: Option<Identity>,
    role: String,
    conversations: HashMap<String, Conversation>,
    flow: Arc<FlowController>,
    recognizer: Option<Arc<Recognizer>>,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        let config = &pipeline.config;
        let flow = Arc::new(FlowController::new(
            config.unit_bytes,
            config.delivery_mode,
            config.flush_tail,
        ));
        let recognizer = pipeline.recognition.clone().map(|backend| {
            Arc::new(Recognizer::new(
                backend,
                config.stt_timeout,
                pipeline.metrics.clone(),
            ))
        });
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Connecting,
            identity: None,
            role: DEFAULT_ROLE.to_string(),
            conversations: HashMap::new(),
            flow,
            recognizer,
            cancel: CancellationToken::new(),
            pipeline,
        }
    }

    /// The session's flow controller. The transport writer checks audio
    /// units against it so nothing queued before an abort is written.
    pub fn flow(&self) -> Arc<FlowController> {
        self.flow.clone()
    }

    /// Drive the session until the transport closes.
    ///
    /// `credentials` are those presented with the connection request, if
    /// any; otherwise the first inbound frame must carry them.
    pub async fn run<S>(
        self,
        credentials: Option<Credentials>,
        inbound: S,
        outbound: mpsc::Sender<Outbound>,
    ) -> SessionState
    where
        S: Stream<Item = Inbound> + Unpin + Send,
    {
        let span = info_span!("session", session_id = %self.id, identity = tracing::field::Empty);
        self.drive(credentials, inbound, outbound).instrument(span).await
    }

    async fn drive<S>(
        mut self,
        credentials: Option<Credentials>,
        mut inbound: S,
        outbound: mpsc::Sender<Outbound>,
    ) -> SessionState
    where
        S: Stream<Item = Inbound> + Unpin + Send,
    {
        self.state = SessionState::Authenticating;
        match self.authenticate(credentials, &mut inbound).await {
            Ok(identity) => {
                Span::current().record("identity", identity.device_id.as_str());
                self.identity = Some(identity);
            }
            Err(AuthFailure::Refused(err)) => {
                info!(code = err.close_code(), "authentication refused: {err}");
                self.pipeline.metrics.auth_refused();
                self.state = SessionState::Closing;
                let _ = outbound
                    .send(Outbound::Close {
                        code: err.close_code(),
                        reason: err.close_reason().to_string(),
                    })
                    .await;
                self.state = SessionState::Closed;
                return self.state;
            }
            Err(AuthFailure::Disconnected(err)) => {
                debug!("client left before authenticating: {err}");
                self.state = SessionState::Closed;
                return self.state;
            }
        }

        self.state = SessionState::Active;
        self.pipeline.metrics.session_opened();
        info!(role = %self.role, "session active");

        let config = &self.pipeline.config;
        let sender = AudioSender::spawn(
            self.flow.clone(),
            outbound.clone(),
            config.sender_poll,
            self.pipeline.metrics.clone(),
            self.cancel.child_token(),
        );
        let consumer = Arc::new(GenerationConsumer::new(
            self.pipeline.generation.clone(),
            SynthesisDispatcher::new(
                self.pipeline.synthesis.clone(),
                config.tts_timeout,
                self.pipeline.metrics.clone(),
            ),
            self.flow.clone(),
            outbound.clone(),
            self.pipeline.metrics.clone(),
            config,
        ));

        let mut reply: Option<ActiveReply> = None;
        let fatal = loop {
            tokio::select! {
                frame = inbound.next() => match frame {
                    Some(Inbound::Text(raw)) => {
                        self.handle_text(&raw, &consumer, &mut reply, &outbound).await;
                    }
                    Some(Inbound::Binary(audio)) => {
                        self.handle_speech(audio, &consumer, &mut reply, &outbound).await;
                    }
                    Some(Inbound::Closed(err)) => {
                        debug!("transport closed: {err}");
                        break false;
                    }
                    None => break false,
                },
                joined = join_reply(&mut reply) => {
                    let Some(done) = reply.take() else { continue };
                    match joined {
                        Ok(result) => self.settle(done.role, result, &outbound),
                        Err(e) => {
                            error!("reply task failed: {e}");
                            break true;
                        }
                    }
                }
                _ = outbound.closed() => {
                    debug!("transport writer gone");
                    break false;
                }
            }
        };

        self.state = SessionState::Closing;
        self.cancel_reply(&mut reply, &outbound).await;
        self.flow.abort();
        self.cancel.cancel();
        sender.shutdown().await;
        if fatal {
            let _ = outbound.try_send(Outbound::Close {
                code: close_code::INTERNAL_ERROR,
                reason: "internal error".to_string(),
            });
        }

        self.pipeline.metrics.session_closed();
        self.state = SessionState::Closed;
        info!("session closed");
        self.state
    }

    async fn authenticate<S>(
        &self,
        credentials: Option<Credentials>,
        inbound: &mut S,
    ) -> Result<Identity, AuthFailure>
    where
        S: Stream<Item = Inbound> + Unpin + Send,
    {
        let wait = self.pipeline.config.auth_timeout;

        let credentials = match credentials {
            Some(credentials) => credentials,
            None => match tokio::time::timeout(wait, inbound.next()).await {
                Err(_) => return Err(AuthError::MissingIdentity.into()),
                Ok(Some(Inbound::Text(raw))) => {
                    parse_identity_frame(&raw).ok_or(AuthError::MissingIdentity)?
                }
                Ok(Some(Inbound::Binary(_))) => return Err(AuthError::MissingIdentity.into()),
                Ok(Some(Inbound::Closed(err))) => return Err(AuthFailure::Disconnected(err)),
                Ok(None) => return Err(AuthFailure::Disconnected(TransportError::Closed)),
            },
        };

        let identity = tokio::time::timeout(wait, self.pipeline.auth.authenticate(&credentials))
            .await
            .map_err(|_| AuthError::Internal("authentication timed out".to_string()))??;
        identity.require(self.pipeline.config.required_permission.as_deref())?;
        Ok(identity)
    }

    async fn handle_text(
        &mut self,
        raw: &str,
        consumer: &Arc<GenerationConsumer>,
        reply: &mut Option<ActiveReply>,
        outbound: &mpsc::Sender<Outbound>,
    ) {
        let messages = match parse_frame(raw) {
            Ok(messages) => messages,
            Err(err) => {
                warn!("ignoring client frame: {err}");
                self.notify(outbound, &err);
                return;
            }
        };

        for message in messages {
            match message {
                ClientMessage::SwitchRole(role) => self.switch_role(role, outbound),
                ClientMessage::Ack => self.flow.acknowledge(),
                ClientMessage::Abort => {
                    self.cancel_reply(reply, outbound).await;
                    self.flow.abort();
                    self.pipeline.metrics.aborted();
                    info!("reply aborted by client");
                }
                ClientMessage::Utterance(text) => {
                    if reply.is_some() {
                        debug!("new utterance supersedes the current reply");
                    }
                    self.cancel_reply(reply, outbound).await;
                    *reply = Some(self.start_reply(TurnInput::Text(text), consumer, outbound));
                }
            }
        }
    }

    /// A binary frame is one complete recorded utterance.
    async fn handle_speech(
        &mut self,
        audio: Vec<u8>,
        consumer: &Arc<GenerationConsumer>,
        reply: &mut Option<ActiveReply>,
        outbound: &mpsc::Sender<Outbound>,
    ) {
        let Some(recognizer) = self.recognizer.clone() else {
            self.notify(outbound, &ProtocolError::UnexpectedBinary);
            return;
        };
        if reply.is_some() {
            debug!("spoken utterance supersedes the current reply");
        }
        self.cancel_reply(reply, outbound).await;
        *reply = Some(self.start_reply(TurnInput::Speech { audio, recognizer }, consumer, outbound));
    }

    fn switch_role(&mut self, role: String, outbound: &mpsc::Sender<Outbound>) {
        if self.pipeline.generation.has_role(&role) {
            info!(from = %self.role, to = %role, "role switched");
            self.role = role;
        } else {
            let err = ProtocolError::InvalidRole(format!("unknown role: {role}"));
            warn!("{err}");
            self.notify(outbound, &err);
        }
    }

    fn start_reply(
        &self,
        input: TurnInput,
        consumer: &Arc<GenerationConsumer>,
        outbound: &mpsc::Sender<Outbound>,
    ) -> ActiveReply {
        let context = self
            .conversations
            .get(&self.role)
            .map(|c| c.messages().to_vec())
            .unwrap_or_default();
        let role = self.role.clone();

        let cancel = self.cancel.child_token();
        let token = cancel.clone();
        let consumer = consumer.clone();
        let notices = outbound.clone();
        let task = async move {
            let prompt = match input {
                TurnInput::Text(text) => text,
                TurnInput::Speech { audio, recognizer } => {
                    let heard = tokio::select! {
                        biased;
                        _ = token.cancelled() => return TurnResult::Interrupted,
                        heard = recognizer.recognize(&audio) => heard,
                    };
                    match heard {
                        Ok(text) => {
                            let event = ServerEvent::Transcript { text: text.clone() };
                            if notices.try_send(Outbound::Event(event)).is_err() {
                                debug!("transcript dropped");
                            }
                            text
                        }
                        Err(err) => return TurnResult::Unheard(err),
                    }
                }
            };
            let utterance = Utterance {
                role,
                context,
                text: prompt.clone(),
            };
            let outcome = consumer.run(utterance, token).await;
            TurnResult::Replied { prompt, outcome }
        };
        let handle = tokio::spawn(task.instrument(Span::current()));

        ActiveReply {
            role: self.role.clone(),
            cancel,
            handle,
        }
    }

    /// Cancel the in-flight reply, if any, and wait until it can no longer
    /// touch the flow controller.
    async fn cancel_reply(&mut self, reply: &mut Option<ActiveReply>, outbound: &mpsc::Sender<Outbound>) {
        let Some(active) = reply.take() else { return };
        active.cancel.cancel();
        match active.handle.await {
            Ok(result) => self.settle(active.role, result, outbound),
            Err(e) if e.is_panic() => error!("reply task panicked: {e}"),
            Err(_) => {}
        }
    }

    fn settle(&mut self, role: String, result: TurnResult, outbound: &mpsc::Sender<Outbound>) {
        let (prompt, outcome) = match result {
            TurnResult::Replied { prompt, outcome } => (prompt, outcome),
            TurnResult::Unheard(err) => {
                warn!("speech not recognized: {err}");
                self.notify(outbound, &err);
                return;
            }
            TurnResult::Interrupted => {
                debug!("turn cancelled during recognition");
                return;
            }
        };
        match outcome {
            GenerationOutcome::Completed { reply } => {
                if reply.trim().is_empty() {
                    return;
                }
                let config = &self.pipeline.config;
                self.conversations
                    .entry(role)
                    .or_insert_with(|| Conversation::new(config.max_turns, config.truncate))
                    .record_exchange(&prompt, &reply);
            }
            GenerationOutcome::Failed(err) => {
                warn!("reply failed: {err}");
                self.notify(outbound, &err);
            }
            GenerationOutcome::Cancelled => debug!("reply cancelled"),
        }
    }

    /// Best-effort error notice; dropped if the outbound queue is full.
    fn notify<E>(&self, outbound: &mpsc::Sender<Outbound>, err: &E)
    where
        E: std::fmt::Display,
        for<'a> NoticeKind: From<&'a E>,
    {
        if outbound
            .try_send(Outbound::Event(ServerEvent::error(err)))
            .is_err()
        {
            debug!("error notice dropped: {err}");
        }
    }
}

async fn join_reply(reply: &mut Option<ActiveReply>) -> Result<TurnResult, JoinError> {
    match reply {
        Some(active) => (&mut active.handle).await,
        None => std::future::pending().await,
    }
}
