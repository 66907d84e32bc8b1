//! AI provider implementations.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use codementor_core::{
    config::ProviderSettings, AiContext, AiProvider, AiResponse, ChatMessage, Error, Result,
};

/// Default tutor persona sent as the system message.
pub const TUTOR_PERSONA: &str = "You are CodeMentor DS, a friendly AI programming tutor helping beginners learn HTML5, CSS, and JavaScript. Provide clear, encouraging feedback in simple language.";

/// Prompt used by the health probe.
const PING_PROMPT: &str = "ping";

/// Fold code context and earlier errors into the user prompt.
pub fn build_prompt(prompt: &str, context: Option<&AiContext>) -> String {
    let mut full = prompt.to_string();
    let Some(context) = context else {
        return full;
    };

    if let Some(code) = context.code.as_deref().filter(|c| !c.is_empty()) {
        let language = context
            .language
            .map(|l| l.as_str())
            .unwrap_or("javascript");
        full.push_str(&format!("\n\nCode:\n```{}\n{}\n```", language, code));
    }
    if !context.previous_errors.is_empty() {
        full.push_str("\n\nPrevious errors:\n");
        full.push_str(&context.previous_errors.join("\n"));
    }
    full
}

// =============================================================================
// OpenAI-compatible chat completion provider
// =============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u64,
}

/// A backend speaking the `/chat/completions` wire format
/// (DeepSeek, GLM, Moonshot).
pub struct ChatCompletionProvider {
    name: String,
    endpoint: String,
    model: String,
    priority: u32,
    max_tokens: u32,
    temperature: f32,
    api_key: Secret<String>,
    client: Client,
    health_interval: Duration,
    last_healthy: Mutex<Option<Instant>>,
}

impl ChatCompletionProvider {
    pub fn new(
        settings: &ProviderSettings,
        api_key: Secret<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::model_provider(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            name: settings.name.clone(),
            endpoint: settings.endpoint.clone(),
            model: settings.model.clone(),
            priority: settings.priority,
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            api_key,
            client,
            health_interval: Duration::from_secs(30),
            last_healthy: Mutex::new(None),
        })
    }

    /// Build from settings, or `None` when the provider is disabled or has
    /// no key.
    pub fn from_settings(settings: &ProviderSettings, request_timeout: Duration) -> Result<Option<Self>> {
        if !settings.enabled {
            tracing::debug!(provider = %settings.name, "Provider disabled");
            return Ok(None);
        }
        let Some(key) = settings.resolve_api_key() else {
            tracing::info!(provider = %settings.name, "No API key configured, provider skipped");
            return Ok(None);
        };
        Self::new(settings, key, request_timeout).map(Some)
    }

    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One round trip. Returns the reply text and total tokens.
    async fn complete(&self, prompt: &str, context: Option<&AiContext>) -> Result<(String, u64)> {
        let system = context
            .and_then(|c| c.system_prompt.as_deref())
            .unwrap_or(TUTOR_PERSONA);
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                ChatMessage::system(system),
                ChatMessage::user(build_prompt(prompt, context)),
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::model_provider(format!("{} request failed: {}", self.name, e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::model_provider(format!(
                "{} API error: {} {}",
                self.name,
                status,
                detail.chars().take(200).collect::<String>()
            )));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::model_provider(format!("{} returned a malformed body: {}", self.name, e)))?;

        let tokens = parsed.usage.map(|u| u.total_tokens).unwrap_or(0);
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| Error::model_provider(format!("{} returned no choices", self.name)))?;

        Ok((content, tokens))
    }
}

#[async_trait]
impl AiProvider for ChatCompletionProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    async fn is_healthy(&self) -> bool {
        let last = *self.last_healthy.lock();
        let recent = last
            .map(|at| at.elapsed() < self.health_interval)
            .unwrap_or(false);
        if recent {
            return true;
        }

        match self.complete(PING_PROMPT, None).await {
            Ok(_) => {
                *self.last_healthy.lock() = Some(Instant::now());
                true
            }
            Err(e) => {
                tracing::warn!(provider = %self.name, error = %e, "Health probe failed");
                false
            }
        }
    }

    async fn call(&self, prompt: &str, context: Option<&AiContext>) -> Result<AiResponse> {
        tracing::debug!(
            provider = %self.name,
            model = %self.model,
            prompt_len = prompt.len(),
            "Calling AI provider"
        );
        let started = Instant::now();
        let (content, tokens_used) = self.complete(prompt, context).await?;

        Ok(AiResponse {
            content,
            provider_name: self.name.clone(),
            response_time_ms: started.elapsed().as_millis() as u64,
            from_cache: false,
            tokens_used,
        })
    }
}

// =============================================================================
// Mock Provider for Testing
// =============================================================================

/// Scripted provider for tests and offline runs.
pub struct MockProvider {
    name: String,
    priority: u32,
    reply: String,
    failing: AtomicBool,
    healthy: AtomicBool,
    calls: AtomicUsize,
}

impl MockProvider {
    /// A provider answering `"{reply}: {prompt}"`.
    pub fn new(name: impl Into<String>, priority: u32, reply: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority,
            reply: reply.into(),
            failing: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    /// A provider whose every call fails.
    pub fn failing(name: impl Into<String>, priority: u32) -> Self {
        let provider = Self::new(name, priority, "");
        provider.set_failing(true);
        provider
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Calls made so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    async fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn call(&self, prompt: &str, _context: Option<&AiContext>) -> Result<AiResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::model_provider(format!("{} mock failure", self.name)));
        }

        Ok(AiResponse {
            content: if self.reply.is_empty() {
                prompt.to_string()
            } else {
                format!("{}: {}", self.reply, prompt)
            },
            provider_name: self.name.clone(),
            response_time_ms: 1,
            from_cache: false,
            tokens_used: (prompt.len() / 4) as u64,
        })
    }
}
