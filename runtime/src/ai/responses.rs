//! HTTP client for OpenAI-compatible chat completion endpoints.
//!
//! Streaming completions are exposed as snapshot streams: every item is the full text
//! generated so far.

use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde_json::{Value, json};
use tokio::time::{Duration, sleep};
use tracing::{debug, warn};

use super::{
    prompts::{SUMMARY_SYSTEM_PROMPT, summary_prompt},
    session::{
        Capabilities, GenerationService, GenerationSession, GenerationSettings, SessionStats,
        SnapshotStream, Summarizer,
    },
};
use crate::{error::GenerationError, pipeline::utils::Tokenizer};

const MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub model: String,
    /// Token budget of one session; prompts and outputs both count against it.
    pub max_tokens: u64,
    pub max_top_k: u32,
    pub default_temperature: f32,
    pub default_top_k: u32,
    /// Forward `top_k` in request bodies. OpenAI rejects it; many local servers accept it.
    pub send_top_k: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 128_000,
            max_top_k: 128,
            default_temperature: 0.3,
            default_top_k: 40,
            send_top_k: false,
        }
    }
}

#[derive(Clone)]
pub struct ResponsesClient {
    http: Client,
    api_key: Option<String>,
    base: String,
    options: ClientOptions,
    tokenizer: Arc<dyn Tokenizer>,
}

impl ResponsesClient {
    pub fn new(
        api_key: Option<String>,
        base: Option<String>,
        options: ClientOptions,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(600))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            api_key,
            base: base
                .unwrap_or_else(|| "https://api.openai.com".into())
                .trim_end_matches('/')
                .to_string(),
            options,
            tokenizer,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1{}", self.base, path)
    }

    async fn post_json(&self, path: &str, body: &Value) -> reqwest::Result<Response> {
        let mut request = self.http.post(self.url(path)).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        request.send().await
    }

    /// Posts with exponential backoff on 429 and 5xx responses.
    async fn post_with_retry(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<Response, GenerationError> {
        let mut delay = Duration::from_millis(300);
        for attempt in 0..MAX_ATTEMPTS {
            let resp = self
                .post_json(path, body)
                .await
                .map_err(|err| GenerationError::Failure(format!("network error | {err}")))?;
            let status = resp.status();
            if status.is_success() {
                return Ok(resp);
            }

            let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            if retryable && attempt + 1 < MAX_ATTEMPTS {
                warn!(%status, attempt, "generation request throttled, retrying");
                sleep(delay).await;
                delay = Duration::from_millis((delay.as_millis() as f64 * 1.8) as u64)
                    + Duration::from_millis(fastrand::u64(0..250));
                continue;
            }

            let err_txt = resp.text().await.unwrap_or_default();
            return Err(classify_error(status, &err_txt));
        }
        Err(GenerationError::Failure("retries exhausted".into()))
    }

    fn completion_body(
        &self,
        settings: &GenerationSettings,
        system: &str,
        user: &str,
        stream: bool,
    ) -> Value {
        let mut body = json!({
            "model": self.options.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ],
            "temperature": settings.temperature,
            "stream": stream,
        });
        if self.options.send_top_k {
            body["top_k"] = json!(settings.top_k);
        }
        if stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        body
    }
}

#[async_trait]
impl GenerationService for ResponsesClient {
    async fn capabilities(&self) -> Result<Capabilities, GenerationError> {
        let mut request = self.http.get(self.url("/models"));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let resp = request
            .send()
            .await
            .map_err(|err| GenerationError::UnsupportedEnvironment(err.to_string()))?;
        if !resp.status().is_success() {
            return Err(GenerationError::UnsupportedEnvironment(format!(
                "model listing returned {}",
                resp.status()
            )));
        }

        Ok(Capabilities {
            default_temperature: self.options.default_temperature,
            default_top_k: self.options.default_top_k,
            max_top_k: self.options.max_top_k,
        })
    }

    async fn create_session(
        &self,
        settings: GenerationSettings,
        system_prompt: &str,
    ) -> Result<Box<dyn GenerationSession>, GenerationError> {
        debug!(
            temperature = settings.temperature,
            top_k = settings.top_k,
            "creating generation session"
        );
        let system_tokens = self.tokenizer.count(system_prompt) as u64;
        Ok(Box::new(ResponsesSession {
            client: self.clone(),
            settings,
            system_prompt: system_prompt.to_string(),
            tokens_used: system_tokens,
            destroyed: false,
        }))
    }
}

#[async_trait]
impl Summarizer for ResponsesClient {
    async fn summarize(&self, text: &str) -> anyhow::Result<String> {
        let settings = GenerationSettings {
            temperature: self.options.default_temperature,
            top_k: self.options.default_top_k,
        };
        let body = self.completion_body(
            &settings,
            SUMMARY_SYSTEM_PROMPT,
            &summary_prompt(text),
            false,
        );
        let resp = self.post_with_retry("/chat/completions", &body).await?;
        let v: Value = resp
            .json()
            .await
            .with_context(|| "Error decoding summarization response")?;
        v.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("summary not found in response"))
    }
}

pub struct ResponsesSession {
    client: ResponsesClient,
    settings: GenerationSettings,
    system_prompt: String,
    tokens_used: u64,
    destroyed: bool,
}

impl ResponsesSession {
    fn tokens_left(&self) -> u64 {
        self.client.options.max_tokens.saturating_sub(self.tokens_used)
    }
}

/// Tokens still owed once a completion finishes. The prompt was charged before the
/// request; a server-reported total supersedes the local output estimate.
fn completion_charge(prompt_tokens: u64, reported_total: Option<u64>, output_tokens: u64) -> u64 {
    reported_total.map_or(output_tokens, |total| total.saturating_sub(prompt_tokens))
}

#[async_trait]
impl GenerationSession for ResponsesSession {
    fn stream_completion<'a>(&'a mut self, prompt: &'a str) -> SnapshotStream<'a> {
        Box::pin(stream! {
            if self.destroyed {
                yield Err(GenerationError::SessionInvalid("session was destroyed".into()));
                return;
            }

            let prompt_tokens = self.client.tokenizer.count(prompt) as u64;
            if prompt_tokens >= self.tokens_left() {
                yield Err(GenerationError::SessionInvalid(format!(
                    "session budget exhausted ({} of {} tokens used)",
                    self.tokens_used, self.client.options.max_tokens
                )));
                return;
            }

            // Charged up front so an abandoned stream still pays for its prompt.
            self.tokens_used += prompt_tokens;

            let body = self.client.completion_body(&self.settings, &self.system_prompt, prompt, true);
            let resp = match self.client.post_with_retry("/chat/completions", &body).await {
                Ok(resp) => resp,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };

            let mut bytes = resp.bytes_stream();
            let mut decoder = SseDecoder::default();
            let mut output = String::new();
            let mut reported_usage: Option<u64> = None;

            'read: while let Some(next) = bytes.next().await {
                let chunk = match next {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        yield Err(GenerationError::Failure(format!("stream interrupted | {err}")));
                        return;
                    }
                };

                for payload in decoder.push(&chunk) {
                    match parse_chunk(&payload) {
                        Ok(ChatChunk::Done) => break 'read,
                        Ok(ChatChunk::Delta { text, total_tokens }) => {
                            if total_tokens.is_some() {
                                reported_usage = total_tokens;
                            }
                            if !text.is_empty() {
                                output.push_str(&text);
                                yield Ok(output.clone());
                            }
                        }
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    }
                }
            }

            let output_tokens = self.client.tokenizer.count(&output) as u64;
            self.tokens_used += completion_charge(prompt_tokens, reported_usage, output_tokens);
        })
    }

    fn stats(&self) -> SessionStats {
        SessionStats {
            max_tokens: self.client.options.max_tokens,
            tokens_used: self.tokens_used,
            tokens_left: self.tokens_left(),
            temperature: self.settings.temperature,
            top_k: self.settings.top_k,
        }
    }

    async fn destroy(&mut self) {
        self.destroyed = true;
    }
}

#[derive(Debug, PartialEq)]
enum ChatChunk {
    Delta {
        text: String,
        total_tokens: Option<u64>,
    },
    Done,
}

fn parse_chunk(payload: &str) -> Result<ChatChunk, GenerationError> {
    if payload.trim() == "[DONE]" {
        return Ok(ChatChunk::Done);
    }

    let v: Value = serde_json::from_str(payload)
        .map_err(|err| GenerationError::Failure(format!("malformed stream event: {err}")))?;

    if let Some(error) = v.get("error") {
        return Err(classify_error_value(error));
    }

    let text = v
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let total_tokens = v.pointer("/usage/total_tokens").and_then(Value::as_u64);

    Ok(ChatChunk::Delta { text, total_tokens })
}

fn classify_error(status: StatusCode, body: &str) -> GenerationError {
    if let Ok(v) = serde_json::from_str::<Value>(body) {
        if let Some(error) = v.get("error") {
            return classify_error_value(error);
        }
    }
    GenerationError::Failure(format!("provider error {status}: {body}"))
}

fn classify_error_value(error: &Value) -> GenerationError {
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| error.as_str())
        .unwrap_or("unknown error")
        .to_string();
    let code = error.get("code").and_then(Value::as_str).unwrap_or_default();
    if code == "context_length_exceeded" {
        GenerationError::SessionInvalid(message)
    } else {
        GenerationError::Failure(message)
    }
}

/// Splits a server-sent-event byte stream into `data:` payloads.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut payloads = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}
