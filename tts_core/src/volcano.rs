//! Volcano Engine (ByteDance) HTTP synthesis.
//!
//! One POST per sentence; the audio comes back base64 encoded in the `data`
//! field of the JSON response.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::SynthesisBackend;

/// Success code reported by the Volcano TTS API.
const SUCCESS_CODE: i64 = 3000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolcanoConfig {
    pub appid: String,
    pub access_token: String,
    pub cluster: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_voice_type")]
    pub voice_type: String,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default = "default_ratio")]
    pub speed_ratio: f32,
    #[serde(default = "default_ratio")]
    pub volume_ratio: f32,
    #[serde(default = "default_ratio")]
    pub pitch_ratio: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "openspeech.bytedance.com".to_string()
}

fn default_voice_type() -> String {
    "BV700_streaming".to_string()
}

fn default_encoding() -> String {
    "pcm".to_string()
}

fn default_ratio() -> f32 {
    1.0
}

fn default_timeout_secs() -> u64 {
    30
}

impl VolcanoConfig {
    /// Read `VOLCANO_*` settings through `lookup`. Returns `None` unless the
    /// app id, access token and cluster are all present.
    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let appid = lookup("VOLCANO_APPID")?;
        let access_token = lookup("VOLCANO_ACCESS_TOKEN")?;
        let cluster = lookup("VOLCANO_CLUSTER")?;

        let ratio = |key: &str| {
            lookup(key)
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_ratio)
        };

        Some(Self {
            appid,
            access_token,
            cluster,
            host: lookup("VOLCANO_HOST").unwrap_or_else(default_host),
            voice_type: lookup("VOLCANO_VOICE_TYPE").unwrap_or_else(default_voice_type),
            encoding: lookup("VOLCANO_ENCODING").unwrap_or_else(default_encoding),
            speed_ratio: ratio("VOLCANO_SPEED_RATIO"),
            volume_ratio: ratio("VOLCANO_VOLUME_RATIO"),
            pitch_ratio: ratio("VOLCANO_PITCH_RATIO"),
            timeout_secs: lookup("VOLCANO_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_timeout_secs),
        })
    }
}

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    app: AppSection<'a>,
    user: UserSection,
    audio: AudioSection<'a>,
    request: RequestSection<'a>,
}

#[derive(Serialize)]
struct AppSection<'a> {
    appid: &'a str,
    // The real token travels in the Authorization header; the API only
    // requires this field to be non-empty.
    token: &'a str,
    cluster: &'a str,
}

#[derive(Serialize)]
struct UserSection {
    uid: String,
}

#[derive(Serialize)]
struct AudioSection<'a> {
    voice_type: &'a str,
    encoding: &'a str,
    speed_ratio: f32,
    volume_ratio: f32,
    pitch_ratio: f32,
}

#[derive(Serialize)]
struct RequestSection<'a> {
    reqid: String,
    text: &'a str,
    text_type: &'a str,
    operation: &'a str,
    with_frontend: u8,
    frontend_type: &'a str,
}

#[derive(Deserialize)]
struct SynthesisResponse {
    code: Option<i64>,
    message: Option<String>,
    data: Option<String>,
}

pub struct VolcanoTts {
    config: VolcanoConfig,
    client: Client,
    api_url: String,
}

impl VolcanoTts {
    pub fn new(config: VolcanoConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build Volcano HTTP client")?;
        let api_url = format!("https://{}/api/v1/tts", config.host);
        Ok(Self {
            config,
            client,
            api_url,
        })
    }

    fn build_request<'a>(&'a self, text: &'a str) -> SynthesisRequest<'a> {
        SynthesisRequest {
            app: AppSection {
                appid: &self.config.appid,
                token: "access_token",
                cluster: &self.config.cluster,
            },
            user: UserSection {
                uid: uuid::Uuid::new_v4().to_string(),
            },
            audio: AudioSection {
                voice_type: &self.config.voice_type,
                encoding: &self.config.encoding,
                speed_ratio: self.config.speed_ratio,
                volume_ratio: self.config.volume_ratio,
                pitch_ratio: self.config.pitch_ratio,
            },
            request: RequestSection {
                reqid: uuid::Uuid::new_v4().to_string(),
                text,
                text_type: "plain",
                operation: "query",
                with_frontend: 1,
                frontend_type: "unitTson",
            },
        }
    }
}

fn decode_response(response: SynthesisResponse) -> anyhow::Result<Vec<u8>> {
    if let Some(code) = response.code {
        if code != SUCCESS_CODE {
            return Err(anyhow::anyhow!(
                "volcano error {}: {}",
                code,
                response.message.unwrap_or_default()
            ));
        }
    }
    let data = response
        .data
        .ok_or_else(|| anyhow::anyhow!("No data in response"))?;
    base64::engine::general_purpose::STANDARD
        .decode(data.as_bytes())
        .context("volcano audio payload is not valid base64")
}

#[async_trait]
impl SynthesisBackend for VolcanoTts {
    fn name(&self) -> &str {
        "volcano"
    }

    async fn synthesize(&self, text: &str) -> anyhow::Result<Vec<u8>> {
        let body = self.build_request(text);
        let response = self
            .client
            .post(&self.api_url)
            // Volcano expects "Bearer;<token>", with a semicolon
            .header("Authorization", format!("Bearer;{}", self.config.access_token))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<SynthesisResponse>()
            .await
            .context("volcano response is not valid JSON")?;

        let audio = decode_response(response)?;
        debug!(bytes = audio.len(), "volcano synthesis complete");
        Ok(audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> VolcanoConfig {
        serde_json::from_value(serde_json::json!({
            "appid": "app",
            "access_token": "secret",
            "cluster": "volcano_tts"
        }))
        .unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let cfg = config();
        assert_eq!(cfg.host, "openspeech.bytedance.com");
        assert_eq!(cfg.encoding, "pcm");
        assert_eq!(cfg.speed_ratio, 1.0);
        assert_eq!(cfg.timeout_secs, 30);
    }

    #[test]
    fn test_from_lookup() {
        let vars = std::collections::HashMap::from([
            ("VOLCANO_APPID", "app"),
            ("VOLCANO_ACCESS_TOKEN", "secret"),
            ("VOLCANO_CLUSTER", "volcano_tts"),
            ("VOLCANO_SPEED_RATIO", "1.5"),
            ("VOLCANO_TIMEOUT_SECS", "oops"),
        ]);
        let cfg = VolcanoConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.appid, "app");
        assert_eq!(cfg.speed_ratio, 1.5);
        assert_eq!(cfg.volume_ratio, 1.0);
        assert_eq!(cfg.timeout_secs, 30);

        assert!(VolcanoConfig::from_lookup(|key| {
            (key != "VOLCANO_CLUSTER").then(|| "x".to_string())
        })
        .is_none());
    }

    #[test]
    fn test_build_request_shape() {
        let tts = VolcanoTts::new(config()).unwrap();
        let body = serde_json::to_value(tts.build_request("你好。")).unwrap();

        assert_eq!(body["app"]["appid"], "app");
        assert_eq!(body["app"]["cluster"], "volcano_tts");
        assert_eq!(body["audio"]["voice_type"], "BV700_streaming");
        assert_eq!(body["request"]["text"], "你好。");
        assert_eq!(body["request"]["operation"], "query");
        assert!(body["request"]["reqid"].as_str().unwrap().len() == 36);
        // the secret never goes into the body
        assert!(!body.to_string().contains("secret"));
    }

    #[test]
    fn test_decode_response_success() {
        let encoded = base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3, 4]);
        let response = SynthesisResponse {
            code: Some(SUCCESS_CODE),
            message: Some("Success".into()),
            data: Some(encoded),
        };
        assert_eq!(decode_response(response).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_decode_response_errors() {
        let failed = SynthesisResponse {
            code: Some(3011),
            message: Some("invalid text".into()),
            data: None,
        };
        let err = decode_response(failed).unwrap_err();
        assert!(err.to_string().contains("3011"));

        let missing = SynthesisResponse {
            code: None,
            message: None,
            data: None,
        };
        assert!(decode_response(missing).is_err());

        let garbage = SynthesisResponse {
            code: Some(SUCCESS_CODE),
            message: None,
            data: Some("***".into()),
        };
        assert!(decode_response(garbage).is_err());
    }
}
