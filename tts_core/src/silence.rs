use async_trait::async_trait;

use crate::{pcm::silence_pcm16, SynthesisBackend};

/// Speech length per non-whitespace character.
const MS_PER_CHAR: u64 = 60;

/// Answers every sentence with PCM silence sized to the text, so the
/// gateway can run end to end without provider credentials.
#[derive(Debug, Clone)]
pub struct SilenceTts {
    sample_rate: u32,
}

impl SilenceTts {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

#[async_trait]
impl SynthesisBackend for SilenceTts {
    fn name(&self) -> &str {
        "silence"
    }

    async fn synthesize(&self, text: &str) -> anyhow::Result<Vec<u8>> {
        let chars = text.chars().filter(|c| !c.is_whitespace()).count() as u64;
        if chars == 0 {
            return Err(anyhow::anyhow!("nothing to synthesize"));
        }
        Ok(silence_pcm16(chars * MS_PER_CHAR, self.sample_rate))
    }
}
