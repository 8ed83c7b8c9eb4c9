//! OpenAI-compatible chat completions client with SSE streaming.
//!
//! Ollama exposes the same `/v1/chat/completions` endpoint, so both
//! providers share one implementation and differ only in defaults.

use std::{str::FromStr, time::Duration};

use anyhow::Context;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    sse::SseDecoder, ChatMessage, GenerationBackend, ReplyChunk, ReplyStream, RoleBook,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Ollama,
}

impl LlmProvider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmProvider::OpenAI => "https://api.openai.com/v1",
            LlmProvider::Ollama => "http://localhost:11434/v1",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::OpenAI => "gpt-3.5-turbo",
            LlmProvider::Ollama => "llama2",
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAI => "openai",
            LlmProvider::Ollama => "ollama",
        }
    }
}

impl FromStr for LlmProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(LlmProvider::OpenAI),
            "ollama" => Ok(LlmProvider::Ollama),
            other => Err(anyhow::anyhow!("Unsupported LLM provider: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub connect_timeout: Duration,
}

impl LlmConfig {
    /// Provider defaults for everything but the model.
    pub fn new(provider: LlmProvider, model: &str) -> Self {
        Self {
            provider,
            model: model.to_string(),
            base_url: provider.default_base_url().to_string(),
            api_key: None,
            temperature: 0.7,
            max_tokens: 500,
            top_p: 1.0,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Structure for the chat completions request
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    stream: bool,
}

/// One streamed `chat.completion.chunk`
#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<StreamError>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamError {
    message: String,
}

/// Text carried by one SSE payload, if any.
fn parse_delta(data: &str) -> anyhow::Result<Option<String>> {
    let chunk: StreamChunk =
        serde_json::from_str(data).with_context(|| format!("unexpected stream payload: {data}"))?;
    if let Some(err) = chunk.error {
        return Err(anyhow::anyhow!(err.message));
    }
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|text| !text.is_empty()))
}

pub struct LlmClient {
    config: LlmConfig,
    client: Client,
    roles: RoleBook,
}

impl LlmClient {
    pub fn new(config: LlmConfig, roles: RoleBook) -> anyhow::Result<Self> {
        if config.provider == LlmProvider::OpenAI && config.api_key.is_none() {
            return Err(anyhow::anyhow!("OPENAI_API_KEY must be set for the openai provider"));
        }
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .context("Failed to build LLM HTTP client")?;
        Ok(Self {
            config,
            client,
            roles,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn build_request(&self, role: &str, context: &[ChatMessage], utterance: &str) -> ChatRequest {
        let mut messages = Vec::with_capacity(context.len() + 2);
        messages.push(ChatMessage::system(self.roles.prompt_for(role)));
        messages.extend_from_slice(context);
        messages.push(ChatMessage::user(utterance));

        ChatRequest {
            model: self.config.model.clone(),
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            top_p: self.config.top_p,
            stream: true,
        }
    }
}

impl GenerationBackend for LlmClient {
    fn name(&self) -> &str {
        self.config.provider.as_str()
    }

    fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    fn stream_reply(&self, role: &str, context: &[ChatMessage], utterance: &str) -> ReplyStream {
        let body = self.build_request(role, context, utterance);
        let request = {
            let req = self.client.post(self.endpoint()).json(&body);
            match &self.config.api_key {
                Some(key) => req.bearer_auth(key),
                None => req,
            }
        };

        Box::pin(async_stream::stream! {
            let response = match request.send().await.and_then(|r| r.error_for_status()) {
                Ok(r) => r,
                Err(e) => {
                    yield ReplyChunk::Error(format!("LLM request failed: {e}"));
                    return;
                }
            };

            let mut body = response.bytes_stream();
            let mut decoder = SseDecoder::new();
            loop {
                let (events, finished) = match body.next().await {
                    Some(Ok(bytes)) => (decoder.feed(&bytes), false),
                    Some(Err(e)) => {
                        yield ReplyChunk::Error(format!("LLM stream interrupted: {e}"));
                        return;
                    }
                    None => (decoder.finish().into_iter().collect::<Vec<_>>(), true),
                };

                for data in events {
                    if data == "[DONE]" {
                        return;
                    }
                    match parse_delta(&data) {
                        Ok(Some(text)) => yield ReplyChunk::Content(text),
                        Ok(None) => {}
                        Err(e) => {
                            yield ReplyChunk::Error(e.to_string());
                            return;
                        }
                    }
                }

                if finished {
                    debug!("LLM stream ended without [DONE]");
                    return;
                }
            }
        })
    }
}
