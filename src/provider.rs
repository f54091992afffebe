use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ResolvedProvider;
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone)]
pub struct TranslationRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl TranslationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProviderUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    /// True when no real model produced the text (missing key, canned reply).
    /// Callers must not trust degraded output as a translation.
    pub degraded: bool,
}

#[derive(Debug, Clone)]
pub struct TranslationResponse {
    pub text: String,
    pub model: String,
    pub confidence: Option<f32>,
    pub usage: ProviderUsage,
}

impl TranslationResponse {
    pub fn new(text: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: model.into(),
            confidence: None,
            usage: ProviderUsage::default(),
        }
    }

    pub fn with_usage(mut self, prompt_tokens: u32, completion_tokens: u32) -> Self {
        self.usage.prompt_tokens = prompt_tokens;
        self.usage.completion_tokens = completion_tokens;
        self
    }

    /// Placeholder response emitted when the provider cannot reach a model.
    pub fn degraded(model: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            model: model.into(),
            confidence: None,
            usage: ProviderUsage {
                degraded: true,
                ..ProviderUsage::default()
            },
        }
    }
}

/// Boundary to the AI model. One call, one completion; retry and prompt
/// assembly live with the caller.
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn translate(&self, request: &TranslationRequest) -> Result<TranslationResponse>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// OpenAI-compatible `/chat/completions` client. Without an API key it does
/// not call out at all and returns degraded responses, so a job can still
/// finish with source-text fallbacks.
pub struct HttpTranslationProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl HttpTranslationProvider {
    pub fn new(cfg: &ResolvedProvider) -> Result<Self> {
        if cfg.api_key.is_none() {
            warn!(
                model = %cfg.model,
                "no API key configured (PRETRANSLATOR_API_KEY); AI segments will fall back to source text"
            );
        }
        let http = reqwest::Client::builder().timeout(cfg.timeout).build()?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
        })
    }
}

#[async_trait]
impl TranslationProvider for HttpTranslationProvider {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn translate(&self, request: &TranslationRequest) -> Result<TranslationResponse> {
        let Some(key) = &self.api_key else {
            return Ok(TranslationResponse::degraded(self.model.clone()));
        };

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(key)
            .json(&ChatRequest {
                model: &self.model,
                messages,
                max_tokens: request.max_tokens,
                temperature: request.temperature,
            })
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(PipelineError::InvalidCredentials(format!(
                "model endpoint rejected the request ({status}); check PRETRANSLATOR_API_KEY"
            )));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PipelineError::RateLimited(format!(
                "model endpoint throttled the request ({status})"
            )));
        }
        if !status.is_success() {
            return Err(PipelineError::Transient(format!(
                "model request failed with status {status}"
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Transient(format!("malformed completion response: {e}")))?;
        let choice = body.choices.into_iter().next().ok_or_else(|| {
            PipelineError::Transient("completion response had no choices".to_string())
        })?;

        let mut out = TranslationResponse::new(
            choice.message.content,
            body.model.unwrap_or_else(|| self.model.clone()),
        );
        if let Some(usage) = body.usage {
            out = out.with_usage(usage.prompt_tokens, usage.completion_tokens);
        }
        Ok(out)
    }
}

/// Scripted provider for tests. Replies are consumed in FIFO order; errors
/// queued ahead of them are surfaced first, once each.
pub struct MockProvider {
    responses: Mutex<VecDeque<String>>,
    errors: Mutex<VecDeque<PipelineError>>,
    prompts: Mutex<Vec<String>>,
    degraded: AtomicBool,
    calls: AtomicU32,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            errors: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            degraded: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        }
    }

    pub fn add_response(&self, text: impl Into<String>) {
        self.responses.lock().push_back(text.into());
    }

    pub fn push_error(&self, err: PipelineError) {
        self.errors.lock().push_back(err);
    }

    pub fn set_degraded(&self, degraded: bool) {
        self.degraded.store(degraded, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().last().cloned()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl TranslationProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn translate(&self, request: &TranslationRequest) -> Result<TranslationResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(request.prompt.clone());
        if let Some(err) = self.errors.lock().pop_front() {
            return Err(err);
        }
        if self.degraded.load(Ordering::SeqCst) {
            return Ok(TranslationResponse::degraded("mock"));
        }
        let text = self
            .responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| "mock output".to_string());
        Ok(TranslationResponse::new(text, "mock"))
    }
}
