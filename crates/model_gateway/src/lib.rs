#![deny(unused)]
//! AI model gateway for CodeMentor.
//!
//! This crate provides:
//! - OpenAI-compatible chat completion providers (DeepSeek, GLM, Moonshot)
//! - Per-provider circuit breakers with priority fallback
//! - A bounded response cache keyed by prompt and code
//! - Tutoring actions (feedback, hints, chat) with per-caller quotas

pub mod breaker;
pub mod cache;
pub mod fallback;
pub mod providers;
pub mod quota;
pub mod tutor;

pub use breaker::{BreakerConfig, BreakerRegistry, BreakerState, CircuitBreaker};
pub use cache::{fingerprint, CacheConfig, ResponseCache};
pub use fallback::AiProviderOrchestrator;
pub use providers::{build_prompt, ChatCompletionProvider, MockProvider, TUTOR_PERSONA};
pub use quota::DailyQuota;
pub use tutor::{ChatReply, Feedback, Hint, TutorService};
