use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use stt_core::RecognitionBackend;
use tracing::debug;

use crate::{error::RecognitionError, metrics::GatewayMetrics};

/// Turns one recorded utterance into text, bounded by a timeout.
pub struct Recognizer {
    backend: Arc<dyn RecognitionBackend>,
    timeout: Duration,
    metrics: Arc<GatewayMetrics>,
}

impl Recognizer {
    pub fn new(
        backend: Arc<dyn RecognitionBackend>,
        timeout: Duration,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            backend,
            timeout,
            metrics,
        }
    }

    /// Transcribe `audio`. Whitespace-only transcripts count as no speech.
    pub async fn recognize(&self, audio: &[u8]) -> Result<String, RecognitionError> {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.timeout, self.backend.recognize(audio)).await {
            Ok(Ok(text)) if text.trim().is_empty() => Err(RecognitionError::Empty),
            Ok(Ok(text)) => Ok(text.trim().to_string()),
            Ok(Err(e)) => Err(RecognitionError::Backend(format!("{e:#}"))),
            Err(_) => Err(RecognitionError::Timeout(self.timeout)),
        };

        match &result {
            Ok(text) => {
                self.metrics.recognized();
                debug!(
                    backend = self.backend.name(),
                    bytes = audio.len(),
                    chars = text.chars().count(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "speech recognized"
                );
            }
            Err(_) => self.metrics.recognition_failed(),
        }
        result
    }
}
