//! Aliyun NLS one-shot recognition over HTTP.
//!
//! The whole utterance is posted as the request body; the transcript comes
//! back in the `result` field.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::RecognitionBackend;

/// Status reported by the NLS gateway for a successful recognition.
const SUCCESS_STATUS: i64 = 20_000_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliyunConfig {
    pub app_key: String,
    pub token: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "nls-gateway-cn-shanghai.aliyuncs.com".to_string()
}

fn default_format() -> String {
    "pcm".to_string()
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_timeout_secs() -> u64 {
    30
}

impl AliyunConfig {
    /// Read `ALIYUN_*` settings through `lookup`. Returns `None` unless both
    /// the app key and the token are present.
    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let app_key = lookup("ALIYUN_APP_KEY").filter(|v| !v.trim().is_empty())?;
        let token = lookup("ALIYUN_TOKEN").filter(|v| !v.trim().is_empty())?;
        Some(Self {
            app_key,
            token,
            host: lookup("ALIYUN_HOST").unwrap_or_else(default_host),
            format: lookup("ALIYUN_FORMAT").unwrap_or_else(default_format),
            sample_rate: lookup("ALIYUN_SAMPLE_RATE")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_sample_rate),
            timeout_secs: lookup("ALIYUN_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_timeout_secs),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RecognitionResponse {
    status: Option<i64>,
    message: Option<String>,
    result: Option<String>,
}

pub struct AliyunStt {
    config: AliyunConfig,
    client: Client,
    api_url: String,
}

impl AliyunStt {
    pub fn new(config: AliyunConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build Aliyun HTTP client")?;
        let api_url = format!("https://{}/stream/v1/asr", config.host);
        Ok(Self {
            config,
            client,
            api_url,
        })
    }

    fn query(&self) -> [(&'static str, String); 3] {
        [
            ("appkey", self.config.app_key.clone()),
            ("format", self.config.format.clone()),
            ("sample_rate", self.config.sample_rate.to_string()),
        ]
    }
}

fn decode_response(response: RecognitionResponse) -> anyhow::Result<String> {
    if let Some(status) = response.status {
        if status != SUCCESS_STATUS {
            return Err(anyhow::anyhow!(
                "aliyun error {}: {}",
                status,
                response.message.unwrap_or_default()
            ));
        }
    }
    Ok(response.result.unwrap_or_default())
}

#[async_trait]
impl RecognitionBackend for AliyunStt {
    fn name(&self) -> &str {
        "aliyun"
    }

    async fn recognize(&self, audio: &[u8]) -> anyhow::Result<String> {
        let response = self
            .client
            .post(&self.api_url)
            .query(&self.query())
            .header("X-NLS-Token", &self.config.token)
            .header("Content-Type", "application/octet-stream")
            .body(audio.to_vec())
            .send()
            .await?
            .error_for_status()?
            .json::<RecognitionResponse>()
            .await
            .context("aliyun response is not valid JSON")?;

        let text = decode_response(response)?;
        debug!(bytes = audio.len(), chars = text.chars().count(), "aliyun recognition complete");
        Ok(text)
    }
}
