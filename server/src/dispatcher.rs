use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tracing::debug;
use tts_core::SynthesisBackend;

use crate::{error::SynthesisError, metrics::GatewayMetrics};

/// Sends one sentence at a time to the synthesis backend, bounded by a
/// timeout. Never touches session state.
pub struct SynthesisDispatcher {
    backend: Arc<dyn SynthesisBackend>,
    timeout: Duration,
    metrics: Arc<GatewayMetrics>,
}

impl SynthesisDispatcher {
    pub fn new(
        backend: Arc<dyn SynthesisBackend>,
        timeout: Duration,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            backend,
            timeout,
            metrics,
        }
    }

    pub async fn synthesize(&self, sentence: &str) -> Result<Vec<u8>, SynthesisError> {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.timeout, self.backend.synthesize(sentence)).await {
            Ok(Ok(audio)) => Ok(audio),
            Ok(Err(e)) => Err(SynthesisError::Backend {
                sentence: sentence.to_string(),
                message: format!("{e:#}"),
            }),
            Err(_) => Err(SynthesisError::Timeout {
                sentence: sentence.to_string(),
                timeout: self.timeout,
            }),
        };

        match &result {
            Ok(audio) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                self.metrics.sentence_synthesized(elapsed_ms);
                debug!(
                    backend = self.backend.name(),
                    bytes = audio.len(),
                    elapsed_ms,
                    "sentence synthesized"
                );
            }
            Err(_) => self.metrics.synthesis_failed(),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct SlowTts(Duration);

    #[async_trait]
    impl SynthesisBackend for SlowTts {
        fn name(&self) -> &str {
            "slow"
        }

        async fn synthesize(&self, text: &str) -> anyhow::Result<Vec<u8>> {
            tokio::time::sleep(self.0).await;
            if text.contains("bad") {
                anyhow::bail!("voice rejected text");
            }
            Ok(text.as_bytes().to_vec())
        }
    }

    fn dispatcher(delay: Duration, timeout: Duration) -> (SynthesisDispatcher, Arc<GatewayMetrics>) {
        let metrics = Arc::new(GatewayMetrics::new());
        (
            SynthesisDispatcher::new(Arc::new(SlowTts(delay)), timeout, metrics.clone()),
            metrics,
        )
    }

    #[tokio::test]
    async fn test_one_sentence_one_unit() {
        let (dispatcher, metrics) = dispatcher(Duration::ZERO, Duration::from_secs(1));
        let audio = dispatcher.synthesize("你好。").await.unwrap();
        assert_eq!(audio, "你好。".as_bytes());
        assert_eq!(metrics.snapshot().sentences_synthesized, 1);
    }

    #[tokio::test]
    async fn test_backend_error_is_tagged_with_sentence() {
        let (dispatcher, metrics) = dispatcher(Duration::ZERO, Duration::from_secs(1));
        let err = dispatcher.synthesize("bad sentence.").await.unwrap_err();
        assert_eq!(err.sentence(), "bad sentence.");
        assert!(err.to_string().contains("voice rejected text"));
        assert_eq!(metrics.snapshot().synthesis_failures, 1);
    }

    #[tokio::test]
    async fn test_timeout_bounds_a_stuck_backend() {
        let (dispatcher, _) = dispatcher(Duration::from_secs(30), Duration::from_millis(50));
        let started = Instant::now();
        let err = dispatcher.synthesize("slow.").await.unwrap_err();
        assert!(matches!(err, SynthesisError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
