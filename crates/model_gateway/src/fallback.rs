//! Priority-ordered provider fallback with circuit breaking and caching.

use std::sync::Arc;
use std::time::Duration;

use codementor_core::{
    config::ModelGatewayConfig, AiContext, AiProvider, AiResponse, Error, Result,
};

use crate::breaker::{BreakerConfig, BreakerRegistry, BreakerState};
use crate::cache::{CacheConfig, ResponseCache};
use crate::providers::ChatCompletionProvider;

/// Routes tutoring prompts across the configured AI backends.
///
/// Owns its breakers and cache; build one per process at the composition
/// root and share it behind an `Arc`.
pub struct AiProviderOrchestrator {
    /// Sorted by ascending priority.
    providers: Vec<Arc<dyn AiProvider>>,
    breakers: BreakerRegistry,
    cache: ResponseCache,
    preflight: bool,
}

impl AiProviderOrchestrator {
    pub fn new(
        mut providers: Vec<Arc<dyn AiProvider>>,
        breaker: BreakerConfig,
        cache: CacheConfig,
    ) -> Self {
        providers.sort_by_key(|p| p.priority());

        let breakers = BreakerRegistry::new(breaker);
        for provider in &providers {
            breakers.register(provider.name());
        }

        Self {
            providers,
            breakers,
            cache: ResponseCache::new(cache),
            preflight: false,
        }
    }

    /// Build the HTTP providers named in `config`.
    ///
    /// Providers without a key are left out. An orchestrator with no
    /// providers is valid and fails every request with
    /// [`Error::AllProvidersUnavailable`].
    pub fn from_config(config: &ModelGatewayConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let health = Duration::from_secs(config.health_check_interval_secs);

        let mut providers: Vec<Arc<dyn AiProvider>> = Vec::new();
        for settings in &config.providers {
            if let Some(provider) = ChatCompletionProvider::from_settings(settings, timeout)? {
                providers.push(Arc::new(provider.with_health_interval(health)));
            }
        }
        if providers.is_empty() {
            tracing::warn!("No AI providers configured; tutoring requests will fail");
        }

        Ok(Self::new(providers, BreakerConfig::from(config), CacheConfig::from(config))
            .with_preflight(config.preflight_health_checks))
    }

    /// Probe each provider's health before calling it.
    pub fn with_preflight(mut self, enabled: bool) -> Self {
        self.preflight = enabled;
        self
    }

    /// Answer `prompt`, from cache when possible.
    pub async fn get_response(&self, prompt: &str, context: Option<&AiContext>) -> Result<AiResponse> {
        let code = context.and_then(|c| c.code.as_deref());
        if let Some(hit) = self.cache.get(prompt, code) {
            tracing::debug!(provider = %hit.provider_name, "AI response served from cache");
            return Ok(hit);
        }

        for provider in &self.providers {
            let name = provider.name();
            if !self.breakers.try_acquire(name) {
                tracing::warn!(provider = name, "Circuit breaker open, skipping provider");
                continue;
            }

            if self.preflight && !provider.is_healthy().await {
                tracing::warn!(provider = name, "Provider failed health probe, skipping");
                self.breakers.record_failure(name);
                continue;
            }

            match provider.call(prompt, context).await {
                Ok(response) => {
                    self.breakers.record_success(name);
                    self.cache.insert(prompt, code, response.clone());
                    tracing::info!(
                        provider = name,
                        response_time_ms = response.response_time_ms,
                        "AI provider answered"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    tracing::error!(provider = name, error = %e, "AI provider failed");
                    self.breakers.record_failure(name);
                }
            }
        }

        Err(Error::AllProvidersUnavailable)
    }

    /// Names of providers whose breakers currently admit calls, in priority
    /// order.
    pub fn available_providers(&self) -> Vec<String> {
        self.providers
            .iter()
            .filter(|p| self.breakers.admits(p.name()))
            .map(|p| p.name().to_string())
            .collect()
    }

    pub fn breaker_state(&self, provider: &str) -> BreakerState {
        self.breakers.state(provider)
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }
}
