//! Drives one reply from the generation backend through segmentation and
//! synthesis into the session's flow controller.

use std::{sync::Arc, time::Duration};

use futures_util::StreamExt;
use llm_core::{ChatMessage, GenerationBackend, ReplyChunk};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    config::PipelineConfig,
    dispatcher::SynthesisDispatcher,
    error::GenerationError,
    flow::FlowController,
    metrics::GatewayMetrics,
    protocol::{Outbound, ServerEvent},
    segmenter::Segmenter,
};

/// One user utterance and the context it is answered in.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub role: String,
    pub context: Vec<ChatMessage>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// The backend finished; `reply` is the full generated text.
    Completed { reply: String },
    Failed(GenerationError),
    Cancelled,
}

#[derive(Debug, Clone)]
struct ConsumerSettings {
    boundaries: Vec<char>,
    max_pending_chars: usize,
    flush_remainder: bool,
    llm_timeout: Duration,
}

pub struct GenerationConsumer {
    backend: Arc<dyn GenerationBackend>,
    dispatcher: SynthesisDispatcher,
    flow: Arc<FlowController>,
    notices: mpsc::Sender<Outbound>,
    metrics: Arc<GatewayMetrics>,
    settings: ConsumerSettings,
}

struct Cancelled;

impl GenerationConsumer {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        dispatcher: SynthesisDispatcher,
        flow: Arc<FlowController>,
        notices: mpsc::Sender<Outbound>,
        metrics: Arc<GatewayMetrics>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            backend,
            dispatcher,
            flow,
            notices,
            metrics,
            settings: ConsumerSettings {
                boundaries: config.boundaries.clone(),
                max_pending_chars: config.max_pending_chars,
                flush_remainder: config.flush_remainder,
                llm_timeout: config.llm_timeout,
            },
        }
    }

    /// Consume the reply to `utterance` until it ends, fails, or `cancel`
    /// fires. Further fragments are discarded once cancelled.
    pub async fn run(&self, utterance: Utterance, cancel: CancellationToken) -> GenerationOutcome {
        self.metrics.utterance_started();
        self.flow.begin_utterance();
        let mut segmenter = Segmenter::new(
            self.settings.boundaries.iter().copied(),
            self.settings.max_pending_chars,
        );
        let mut stream =
            self.backend
                .stream_reply(&utterance.role, &utterance.context, &utterance.text);
        let mut reply = String::new();

        let failure = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return GenerationOutcome::Cancelled,
                next = tokio::time::timeout(self.settings.llm_timeout, stream.next()) => next,
            };

            match next {
                Err(_) => break Some(GenerationError::Timeout(self.settings.llm_timeout)),
                Ok(None) => break None,
                Ok(Some(ReplyChunk::Error(message))) => break Some(GenerationError::Backend(message)),
                Ok(Some(ReplyChunk::Content(fragment))) => {
                    reply.push_str(&fragment);
                    for sentence in segmenter.feed(&fragment) {
                        if self.speak(&sentence, &cancel).await.is_err() {
                            return GenerationOutcome::Cancelled;
                        }
                    }
                }
            }
        };
        drop(stream);

        if let Some(err) = failure {
            self.metrics.generation_failed();
            // sentences already buffered still play out
            self.flow.finish_utterance();
            return GenerationOutcome::Failed(err);
        }

        if self.settings.flush_remainder {
            if let Some(rest) = segmenter.flush() {
                if !rest.trim().is_empty() && self.speak(&rest, &cancel).await.is_err() {
                    return GenerationOutcome::Cancelled;
                }
            }
        }
        self.flow.finish_utterance();
        debug!(chars = reply.chars().count(), "reply complete");
        GenerationOutcome::Completed { reply }
    }

    /// Synthesize one sentence and buffer its audio. A failed sentence is
    /// reported and skipped.
    async fn speak(&self, sentence: &str, cancel: &CancellationToken) -> Result<(), Cancelled> {
        if sentence.trim().is_empty() {
            return Ok(());
        }
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Cancelled),
            result = self.dispatcher.synthesize(sentence) => result,
        };
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }

        match result {
            Ok(audio) => self.flow.append(&audio),
            Err(err) => {
                warn!(sentence = err.sentence(), "skipping sentence: {err}");
                if self
                    .notices
                    .try_send(Outbound::Event(ServerEvent::error(&err)))
                    .is_err()
                {
                    debug!("synthesis notice dropped: {err}");
                }
            }
        }
        Ok(())
    }
}
