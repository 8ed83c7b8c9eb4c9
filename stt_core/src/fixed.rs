use async_trait::async_trait;

use crate::RecognitionBackend;

/// Hears the same phrase in any non-empty audio. Lets the voice path run end
/// to end without recognition credentials.
#[derive(Debug, Clone)]
pub struct FixedTranscriptStt {
    transcript: String,
}

impl FixedTranscriptStt {
    pub fn new(transcript: &str) -> Self {
        Self {
            transcript: transcript.to_string(),
        }
    }
}

#[async_trait]
impl RecognitionBackend for FixedTranscriptStt {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn recognize(&self, audio: &[u8]) -> anyhow::Result<String> {
        if audio.is_empty() {
            return Err(anyhow::anyhow!("no audio to recognize"));
        }
        Ok(self.transcript.clone())
    }
}
