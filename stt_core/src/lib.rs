//! Speech recognition backends.
//!
//! Providers are reached through [`RecognitionBackend`]: one complete
//! utterance of audio in, its transcript out. The provider is chosen once at
//! startup by name through [`create_backend`].

mod aliyun;
mod fixed;

use std::{fmt, str::FromStr, sync::Arc};

use async_trait::async_trait;

pub use aliyun::{AliyunConfig, AliyunStt};
pub use fixed::FixedTranscriptStt;

/// Capability interface every recognition provider implements.
#[async_trait]
pub trait RecognitionBackend: Send + Sync {
    /// Provider name, used in logs.
    fn name(&self) -> &str;

    /// Transcribe one utterance of encoded audio.
    async fn recognize(&self, audio: &[u8]) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttProvider {
    Aliyun,
    Fixed,
}

impl FromStr for SttProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aliyun" => Ok(SttProvider::Aliyun),
            "fixed" => Ok(SttProvider::Fixed),
            other => Err(anyhow::anyhow!("Unsupported STT provider: {other}")),
        }
    }
}

impl fmt::Display for SttProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SttProvider::Aliyun => "aliyun",
            SttProvider::Fixed => "fixed",
        })
    }
}

#[derive(Debug, Clone)]
pub struct SttConfig {
    pub aliyun: Option<AliyunConfig>,
    /// Transcript returned by the `fixed` provider.
    pub fixed_transcript: String,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            aliyun: None,
            fixed_transcript: "你好".to_string(),
        }
    }
}

/// Build the backend for `provider`.
pub fn create_backend(
    provider: SttProvider,
    config: &SttConfig,
) -> anyhow::Result<Arc<dyn RecognitionBackend>> {
    match provider {
        SttProvider::Aliyun => {
            let cfg = config.aliyun.clone().ok_or_else(|| {
                anyhow::anyhow!("aliyun provider selected but ALIYUN_APP_KEY and ALIYUN_TOKEN are not both set")
            })?;
            Ok(Arc::new(AliyunStt::new(cfg)?))
        }
        SttProvider::Fixed => Ok(Arc::new(FixedTranscriptStt::new(&config.fixed_transcript))),
    }
}
