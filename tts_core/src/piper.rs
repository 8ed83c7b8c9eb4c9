//! Local Piper voices (ONNX), enabled with the `piper` feature.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::Context;
use async_trait::async_trait;
use piper_rs::synth::{PiperSpeechStreamParallel, PiperSpeechSynthesizer};
use tracing::info;

use crate::{pcm::samples_to_pcm16, SynthesisBackend};

pub struct PiperTts {
    cfg_path: PathBuf,
    sample_rate: u32,
    synth: Arc<Mutex<PiperSpeechSynthesizer>>,
}

// PiperSpeechSynthesizer doesn't implement Debug
impl std::fmt::Debug for PiperTts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PiperTts")
            .field("cfg_path", &self.cfg_path)
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

impl PiperTts {
    /// Load the voice described by a Piper `*.onnx.json` config.
    pub fn from_config_path<P: AsRef<Path>>(cfg_path: P) -> anyhow::Result<Self> {
        let sample_rate = Self::read_sample_rate(&cfg_path)?;
        let model = piper_rs::from_config_path(cfg_path.as_ref())
            .map_err(|e| anyhow::anyhow!("piper load error: {e}"))?;
        let synth = PiperSpeechSynthesizer::new(model)?;
        info!(
            "Loaded piper voice {} ({} Hz)",
            cfg_path.as_ref().display(),
            sample_rate
        );
        Ok(Self {
            cfg_path: cfg_path.as_ref().to_path_buf(),
            sample_rate,
            synth: Arc::new(Mutex::new(synth)),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_sample_rate<P: AsRef<Path>>(cfg_path: P) -> anyhow::Result<u32> {
        let text = fs::read_to_string(cfg_path.as_ref()).with_context(|| {
            format!("Failed to read config file: {}", cfg_path.as_ref().display())
        })?;
        let json: serde_json::Value =
            serde_json::from_str(&text).with_context(|| "Config file is not valid JSON")?;

        let sample_rate = json
            .get("audio")
            .and_then(|a| a.get("sample_rate"))
            .and_then(|sr| sr.as_u64())
            .ok_or_else(|| anyhow::anyhow!("Missing or invalid 'audio.sample_rate' in config"))?;

        Ok(sample_rate as u32)
    }
}

#[async_trait]
impl SynthesisBackend for PiperTts {
    fn name(&self) -> &str {
        "piper"
    }

    async fn synthesize(&self, text: &str) -> anyhow::Result<Vec<u8>> {
        let synth = self.synth.clone();
        let text = text.to_string();

        // onnxruntime inference is CPU bound
        let samples = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<f32>> {
            let synth = synth
                .lock()
                .map_err(|_| anyhow::anyhow!("Synthesizer lock poisoned"))?;
            let iter: PiperSpeechStreamParallel = synth
                .synthesize_parallel(text, None)
                .map_err(|e| anyhow::anyhow!("piper synth error: {e}"))?;

            let mut samples: Vec<f32> = Vec::new();
            for part in iter {
                samples.extend(
                    part.map_err(|e| anyhow::anyhow!("chunk error: {e}"))?
                        .into_vec(),
                );
            }
            Ok(samples)
        })
        .await
        .context("piper synthesis task failed")??;

        Ok(samples_to_pcm16(&samples))
    }
}
