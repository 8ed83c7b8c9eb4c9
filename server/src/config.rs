// Configuration for the gateway, read once from the environment at startup

use std::{str::FromStr, time::Duration};

use llm_core::{LlmConfig, LlmProvider, TruncateMode};
use stt_core::{AliyunConfig, SttConfig, SttProvider};
use tracing::warn;
use tts_core::{TtsConfig, TtsProvider, VolcanoConfig};

/// Terminal punctuation recognised by the segmenter unless overridden.
pub const DEFAULT_BOUNDARIES: &str = ".!?;。！？；．｡";

/// How buffered audio is released to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// One unit per client acknowledgement.
    Ack,
    /// Units flow whenever enough audio is buffered.
    Continuous,
}

impl FromStr for DeliveryMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ack" => Ok(DeliveryMode::Ack),
            "continuous" => Ok(DeliveryMode::Continuous),
            other => Err(anyhow::anyhow!("Unknown delivery mode: {other}")),
        }
    }
}

/// Per-session pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub unit_bytes: usize,
    pub delivery_mode: DeliveryMode,
    pub flush_tail: bool,
    pub sender_poll: Duration,
    pub boundaries: Vec<char>,
    pub max_pending_chars: usize,
    pub flush_remainder: bool,
    pub llm_timeout: Duration,
    pub tts_timeout: Duration,
    pub stt_timeout: Duration,
    pub auth_timeout: Duration,
    pub outbound_queue: usize,
    pub required_permission: Option<String>,
    pub max_turns: usize,
    pub truncate: TruncateMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            unit_bytes: 8192,
            delivery_mode: DeliveryMode::Ack,
            flush_tail: true,
            sender_poll: Duration::from_millis(20),
            boundaries: DEFAULT_BOUNDARIES.chars().collect(),
            max_pending_chars: 400,
            flush_remainder: true,
            llm_timeout: Duration::from_secs(30),
            tts_timeout: Duration::from_secs(15),
            stt_timeout: Duration::from_secs(15),
            auth_timeout: Duration::from_secs(10),
            outbound_queue: 32,
            required_permission: None,
            max_turns: 10,
            truncate: TruncateMode::Sliding,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub rate_limit_per_minute: u32,
    pub request_timeout_secs: u64,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub auth_keys_path: String,
    pub roles_path: String,
    pub llm: LlmConfig,
    pub tts_provider: TtsProvider,
    pub tts: TtsConfig,
    /// Unset leaves speech input disabled.
    pub stt_provider: Option<SttProvider>,
    pub stt: SttConfig,
    pub pipeline: PipelineConfig,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key/value source. Invalid values
    /// fall back to their defaults with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);
        let defaults = PipelineConfig::default();

        let boundaries = match env.get("SENTENCE_BOUNDARIES") {
            Some(set) if !set.trim().is_empty() => set.chars().filter(|c| !c.is_whitespace()).collect(),
            _ => defaults.boundaries.clone(),
        };

        let required_permission = env
            .get("REQUIRED_PERMISSION")
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        let unit_bytes = match env.parse("AUDIO_UNIT_BYTES", defaults.unit_bytes) {
            0 => {
                warn!("AUDIO_UNIT_BYTES must be positive, using {}", defaults.unit_bytes);
                defaults.unit_bytes
            }
            n => n,
        };

        let pipeline = PipelineConfig {
            unit_bytes,
            delivery_mode: env.parse("DELIVERY_MODE", defaults.delivery_mode),
            flush_tail: env.parse("FLUSH_TAIL", defaults.flush_tail),
            sender_poll: Duration::from_millis(env.parse("SENDER_POLL_MS", 20)),
            boundaries,
            max_pending_chars: env.parse("MAX_PENDING_CHARS", defaults.max_pending_chars),
            flush_remainder: env.parse("FLUSH_REMAINDER", defaults.flush_remainder),
            llm_timeout: Duration::from_secs(env.parse("LLM_TIMEOUT_SECS", 30)),
            tts_timeout: Duration::from_secs(env.parse("TTS_TIMEOUT_SECS", 15)),
            stt_timeout: Duration::from_secs(env.parse("STT_TIMEOUT_SECS", 15)),
            auth_timeout: Duration::from_secs(env.parse("AUTH_TIMEOUT_SECS", 10)),
            outbound_queue: env.parse("OUTBOUND_QUEUE", defaults.outbound_queue).max(1),
            required_permission,
            max_turns: env.parse("CONVERSATION_MAX_TURNS", defaults.max_turns),
            truncate: env.parse("CONVERSATION_TRUNCATE", defaults.truncate),
        };

        let provider: LlmProvider = env.parse("LLM_PROVIDER", LlmProvider::OpenAI);
        let model = env
            .get("LLM_MODEL")
            .unwrap_or_else(|| provider.default_model().to_string());
        let mut llm = LlmConfig::new(provider, &model);
        if let Some(url) = env.get("LLM_BASE_URL") {
            llm.base_url = url;
        }
        llm.api_key = env.get("OPENAI_API_KEY").filter(|k| !k.trim().is_empty());
        llm.temperature = env.parse("LLM_TEMPERATURE", llm.temperature);
        llm.max_tokens = env.parse("LLM_MAX_TOKENS", llm.max_tokens);
        llm.top_p = env.parse("LLM_TOP_P", llm.top_p);

        let tts = TtsConfig {
            volcano: VolcanoConfig::from_lookup(&lookup),
            piper_config_path: env.get("PIPER_CONFIG_PATH"),
            ..TtsConfig::default()
        };

        let stt_provider = match env.get("STT_PROVIDER").filter(|p| !p.trim().is_empty()) {
            None => None,
            Some(name) => match name.parse::<SttProvider>() {
                Ok(provider) => Some(provider),
                Err(e) => {
                    warn!("{e}, speech input disabled");
                    None
                }
            },
        };
        let stt_defaults = SttConfig::default();
        let stt = SttConfig {
            aliyun: AliyunConfig::from_lookup(&lookup),
            fixed_transcript: env
                .get("STT_FIXED_TRANSCRIPT")
                .unwrap_or(stt_defaults.fixed_transcript),
        };

        let cors_allowed_origins = env.get("CORS_ALLOWED_ORIGINS").map(|origins| {
            origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        Self {
            port: env.parse("PORT", 8000),
            rate_limit_per_minute: env.parse("RATE_LIMIT_PER_MINUTE", 60),
            request_timeout_secs: env.parse("REQUEST_TIMEOUT_SECS", 30),
            cors_allowed_origins,
            auth_keys_path: env
                .get("AUTH_KEYS_PATH")
                .unwrap_or_else(|| "config/api_keys.json".to_string()),
            roles_path: env
                .get("ROLES_PATH")
                .unwrap_or_else(|| "config/prompts.json".to_string()),
            llm,
            tts_provider: env.parse("TTS_PROVIDER", TtsProvider::Silence),
            tts,
            stt_provider,
            stt,
            pipeline,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr + std::fmt::Debug,
    {
        match self.get(key) {
            None => default,
            Some(raw) => match raw.trim().parse() {
                Ok(value) => value,
                Err(_) => {
                    warn!("Invalid value {raw:?} for {key}, using {default:?}");
                    default
                }
            },
        }
    }
}
