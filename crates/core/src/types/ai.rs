use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::execution::Language;

// =============================================================================
// Tutoring Requests
// =============================================================================

/// Optional context attached to a tutoring prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiContext {
    /// Learner code; participates in the cache fingerprint.
    pub code: Option<String>,
    pub language: Option<Language>,
    pub lesson_id: Option<String>,
    pub user_level: Option<u32>,
    #[serde(default)]
    pub previous_errors: Vec<String>,
    /// Replaces the provider's default tutor persona.
    pub system_prompt: Option<String>,
}

impl AiContext {
    /// Context carrying only learner code.
    pub fn with_code(code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            ..Default::default()
        }
    }

    pub fn language(mut self, language: Language) -> Self {
        self.language = Some(language);
        self
    }

    pub fn previous_error(mut self, error: impl Into<String>) -> Self {
        self.previous_errors.push(error.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

/// Normalized answer from any backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiResponse {
    pub content: String,
    pub provider_name: String,
    pub response_time_ms: u64,
    pub from_cache: bool,
    /// Total tokens reported by the backend, zero when not reported.
    #[serde(default)]
    pub tokens_used: u64,
}

/// Chat message in the OpenAI-compatible wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role (system, user, assistant).
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

// =============================================================================
// Caller Identity & Analytics
// =============================================================================

/// Opaque caller identity supplied by the auth layer.
///
/// Only used to key quotas and attribute usage; never validated here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallerId(pub String);

impl CallerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn anonymous() -> Self {
        Self("anonymous".into())
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of tutoring interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Feedback,
    Hint,
    Chat,
    Explanation,
    Debug,
}

/// Usage record handed to the analytics sink after each answered request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionRecord {
    pub caller: CallerId,
    pub kind: InteractionKind,
    pub provider_name: String,
    pub response_time_ms: u64,
    pub tokens_used: u64,
    pub from_cache: bool,
    pub recorded_at: DateTime<Utc>,
}

impl InteractionRecord {
    pub fn from_response(caller: CallerId, kind: InteractionKind, response: &AiResponse) -> Self {
        Self {
            caller,
            kind,
            provider_name: response.provider_name.clone(),
            response_time_ms: response.response_time_ms,
            tokens_used: response.tokens_used,
            from_cache: response.from_cache,
            recorded_at: Utc::now(),
        }
    }
}
