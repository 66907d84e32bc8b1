use config::{Config, Environment, File};
use secrecy::Secret;
use serde::Deserialize;

use crate::Result;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub sandbox: SandboxSettings,
    pub model_gateway: ModelGatewayConfig,
    pub tutor: TutorConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SandboxSettings {
    /// Host-side deadline for one execution.
    pub execution_timeout_ms: u64,
    /// Wall-clock budget enforced inside the boundary. Kept below
    /// `execution_timeout_ms` so a slow run still reports its own error.
    pub script_budget_ms: u64,
    /// Whether the playground rewrites loops before execution.
    pub harden_loops: bool,
    pub max_loop_iterations: u64,
    /// Engine-level cap per loop, independent of the loop guard.
    pub engine_loop_limit: u64,
    pub engine_recursion_limit: usize,
    /// Inputs longer than this draw an oversized-input warning.
    pub max_code_length: usize,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            execution_timeout_ms: 10_000,
            script_budget_ms: 5_000,
            harden_loops: true,
            max_loop_iterations: 100_000,
            engine_loop_limit: 10_000_000,
            engine_recursion_limit: 512,
            max_code_length: 50_000,
        }
    }
}

/// Deployment tier selecting cache defaults.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    /// Application server: 1000 entries, one hour.
    #[default]
    Standard,
    /// Edge function: 100 entries, five minutes.
    Edge,
}

impl CacheTier {
    pub fn max_entries(&self) -> usize {
        match self {
            Self::Standard => 1000,
            Self::Edge => 100,
        }
    }

    pub fn ttl_secs(&self) -> u64 {
        match self {
            Self::Standard => 3600,
            Self::Edge => 300,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ModelGatewayConfig {
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
    pub cache_tier: CacheTier,
    /// Overrides the tier's entry cap.
    pub cache_max_entries: Option<usize>,
    /// Overrides the tier's time-to-live.
    pub cache_ttl_secs: Option<u64>,
    pub health_check_interval_secs: u64,
    pub preflight_health_checks: bool,
    pub request_timeout_secs: u64,
    pub providers: Vec<ProviderSettings>,
}

impl Default for ModelGatewayConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_secs: 300,
            cache_tier: CacheTier::Standard,
            cache_max_entries: None,
            cache_ttl_secs: None,
            health_check_interval_secs: 30,
            preflight_health_checks: false,
            request_timeout_secs: 30,
            providers: vec![
                ProviderSettings::new(
                    "DeepSeek",
                    "https://api.deepseek.com/v1/chat/completions",
                    "deepseek-chat",
                    1,
                    "DEEPSEEK_API_KEY",
                ),
                ProviderSettings::new(
                    "GLM",
                    "https://open.bigmodel.cn/api/paas/v4/chat/completions",
                    "glm-4-flash",
                    2,
                    "GLM_API_KEY",
                ),
                ProviderSettings::new(
                    "Moonshot",
                    "https://api.moonshot.cn/v1/chat/completions",
                    "moonshot-v1-8k",
                    3,
                    "MOONSHOT_API_KEY",
                ),
            ],
        }
    }
}

impl ModelGatewayConfig {
    pub fn effective_cache_entries(&self) -> usize {
        self.cache_max_entries
            .unwrap_or_else(|| self.cache_tier.max_entries())
    }

    pub fn effective_cache_ttl_secs(&self) -> u64 {
        self.cache_ttl_secs.unwrap_or_else(|| self.cache_tier.ttl_secs())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderSettings {
    pub name: String,
    pub endpoint: String,
    pub model: String,
    pub priority: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Inline key; takes precedence over `api_key_env`.
    #[serde(default)]
    pub api_key: Option<Secret<String>>,
    /// Environment variable holding the key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl ProviderSettings {
    fn new(name: &str, endpoint: &str, model: &str, priority: u32, key_env: &str) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            model: model.into(),
            priority,
            enabled: true,
            api_key: None,
            api_key_env: Some(key_env.into()),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }

    /// The configured key, reading the named environment variable if needed.
    pub fn resolve_api_key(&self) -> Option<Secret<String>> {
        if let Some(key) = &self.api_key {
            return Some(key.clone());
        }
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|value| !value.trim().is_empty())
            .map(Secret::new)
    }
}

fn default_true() -> bool {
    true
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_temperature() -> f32 {
    0.7
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TutorConfig {
    pub daily_quota: u32,
    pub quota_window_secs: u64,
    /// Prior chat messages included in a chat prompt.
    pub history_window: usize,
}

impl Default for TutorConfig {
    fn default() -> Self {
        Self {
            daily_quota: 100,
            quota_window_secs: 24 * 60 * 60,
            history_window: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub json_logs: bool,
    /// Filter used when `RUST_LOG` is unset.
    pub default_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json_logs: false,
            default_filter: "info,codementor=debug".into(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let env = std::env::var("CODEMENTOR_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map APP__SANDBOX__EXECUTION_TIMEOUT_MS=5000 to sandbox.execution_timeout_ms
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(s.try_deserialize()?)
    }
}
