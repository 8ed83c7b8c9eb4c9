//! Speech synthesis backends.
//!
//! Every provider is reached through [`SynthesisBackend`]: one sentence of
//! text in, one contiguous span of audio bytes out, no batching. Providers
//! are selected once at startup by name through [`create_backend`].

mod pcm;
#[cfg(feature = "piper")]
mod piper;
mod silence;
mod volcano;

use std::{fmt, str::FromStr, sync::Arc};

use async_trait::async_trait;

pub use pcm::{samples_to_pcm16, silence_pcm16};
#[cfg(feature = "piper")]
pub use piper::PiperTts;
pub use silence::SilenceTts;
pub use volcano::{VolcanoConfig, VolcanoTts};

/// Capability interface every synthesis provider implements.
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    /// Provider name, used in logs.
    fn name(&self) -> &str;

    /// Synthesize a single sentence into raw audio bytes.
    async fn synthesize(&self, text: &str) -> anyhow::Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsProvider {
    Volcano,
    Silence,
    Piper,
}

impl FromStr for TtsProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "volcano" => Ok(TtsProvider::Volcano),
            "silence" => Ok(TtsProvider::Silence),
            "piper" => Ok(TtsProvider::Piper),
            other => Err(anyhow::anyhow!("Unsupported TTS provider: {other}")),
        }
    }
}

impl fmt::Display for TtsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TtsProvider::Volcano => "volcano",
            TtsProvider::Silence => "silence",
            TtsProvider::Piper => "piper",
        };
        f.write_str(name)
    }
}

/// Provider settings gathered at startup. Only the section for the selected
/// provider has to be present.
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub volcano: Option<VolcanoConfig>,
    pub piper_config_path: Option<String>,
    pub silence_sample_rate: u32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            volcano: None,
            piper_config_path: None,
            silence_sample_rate: 16_000,
        }
    }
}

/// Build the backend for `provider`.
pub fn create_backend(
    provider: TtsProvider,
    config: &TtsConfig,
) -> anyhow::Result<Arc<dyn SynthesisBackend>> {
    match provider {
        TtsProvider::Volcano => {
            let cfg = config.volcano.clone().ok_or_else(|| {
                anyhow::anyhow!(
                    "volcano provider selected but VOLCANO_APPID, VOLCANO_ACCESS_TOKEN and VOLCANO_CLUSTER are not all set"
                )
            })?;
            Ok(Arc::new(VolcanoTts::new(cfg)?))
        }
        TtsProvider::Silence => Ok(Arc::new(SilenceTts::new(config.silence_sample_rate))),
        #[cfg(feature = "piper")]
        TtsProvider::Piper => {
            let path = config
                .piper_config_path
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("piper provider selected but PIPER_CONFIG_PATH is not set"))?;
            Ok(Arc::new(PiperTts::from_config_path(path)?))
        }
        #[cfg(not(feature = "piper"))]
        TtsProvider::Piper => Err(anyhow::anyhow!(
            "piper provider requires building tts_core with the `piper` feature"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_str() {
        assert_eq!("volcano".parse::<TtsProvider>().unwrap(), TtsProvider::Volcano);
        assert_eq!(" Silence ".parse::<TtsProvider>().unwrap(), TtsProvider::Silence);
        assert_eq!("piper".parse::<TtsProvider>().unwrap(), TtsProvider::Piper);
        assert!("espeak".parse::<TtsProvider>().is_err());
    }

    #[test]
    fn test_create_backend_volcano_requires_settings() {
        let result = create_backend(TtsProvider::Volcano, &TtsConfig::default());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_create_backend_silence() {
        let backend = create_backend(TtsProvider::Silence, &TtsConfig::default()).unwrap();
        assert_eq!(backend.name(), "silence");
        let audio = backend.synthesize("你好。").await.unwrap();
        assert!(!audio.is_empty());
    }
}
