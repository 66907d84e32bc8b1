//! Tutoring actions built on the provider orchestrator.
//!
//! Every action follows the same path: check input, charge the caller's
//! quota, ask the orchestrator, shape the reply, report usage.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use codementor_core::{
    config::TutorConfig, AiContext, AiResponse, CallerId, ChatMessage, Error, InteractionKind,
    InteractionRecord, Language, Result, UsageSink,
};

use crate::fallback::AiProviderOrchestrator;
use crate::quota::DailyQuota;

const FEEDBACK_PERSONA: &str = "You are CodeMentor DS, a friendly and encouraging programming tutor. Provide clear, actionable feedback.";
const HINT_PERSONA: &str = "You are CodeMentor DS, a patient programming tutor. Give progressive hints without revealing the full solution.";
const CHAT_PERSONA: &str = "You are CodeMentor DS, an AI programming tutor. Help students learn web development with clear explanations and encouragement.";

/// Score used when the assessment is not valid JSON.
pub const FALLBACK_SCORE: u32 = 75;

pub const MAX_HINT_LEVEL: u8 = 3;

// =============================================================================
// Replies
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub score: u32,
    pub feedback: String,
    pub suggestions: Vec<String>,
    pub provider_name: String,
    pub response_time_ms: u64,
    pub from_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub hint: String,
    pub hint_level: u8,
    pub next_hint_available: bool,
    pub provider_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub response: String,
    pub conversation_id: uuid::Uuid,
    pub provider_name: String,
    pub tokens_used: u64,
}

#[derive(Debug, Deserialize)]
struct Assessment {
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    feedback: String,
    #[serde(default)]
    suggestions: Vec<String>,
}

/// Read a JSON assessment, tolerating prose or code fences around it.
fn parse_assessment(raw: &str) -> Option<Assessment> {
    let trimmed = raw.trim();
    if let Ok(parsed) = serde_json::from_str(trimmed) {
        return Some(parsed);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

// =============================================================================
// Service
// =============================================================================

pub struct TutorService {
    orchestrator: Arc<AiProviderOrchestrator>,
    quota: DailyQuota,
    usage: Arc<dyn UsageSink>,
    history_window: usize,
}

impl TutorService {
    pub fn new(
        orchestrator: Arc<AiProviderOrchestrator>,
        usage: Arc<dyn UsageSink>,
        config: &TutorConfig,
    ) -> Self {
        Self {
            orchestrator,
            quota: DailyQuota::from(config),
            usage,
            history_window: config.history_window,
        }
    }

    pub fn orchestrator(&self) -> &AiProviderOrchestrator {
        &self.orchestrator
    }

    pub fn remaining_quota(&self, caller: &CallerId) -> u32 {
        self.quota.remaining(caller)
    }

    /// Score `code` out of 100 with feedback and suggestions.
    pub async fn feedback(&self, caller: &CallerId, code: &str, language: Language) -> Result<Feedback> {
        if code.trim().is_empty() {
            return Err(Error::invalid_request("Code is required"));
        }

        let prompt = format!(
            concat!(
                "Analyze the following {lang} code and provide constructive feedback:\n\n",
                "```{lang}\n{code}\n```\n\n",
                "Provide:\n",
                "1. Overall assessment (score out of 100)\n",
                "2. What's done well\n",
                "3. Areas for improvement\n",
                "4. Specific suggestions\n\n",
                "Format as JSON: {{ \"score\": number, \"feedback\": string, \"suggestions\": string[] }}"
            ),
            lang = language,
            code = code,
        );
        let response = self
            .ask(caller, InteractionKind::Feedback, &prompt, FEEDBACK_PERSONA)
            .await?;

        let (score, feedback, suggestions) = match parse_assessment(&response.content) {
            Some(assessment) => (
                assessment
                    .score
                    .map(|s| s.clamp(0.0, 100.0).round() as u32)
                    .unwrap_or(FALLBACK_SCORE),
                assessment.feedback,
                assessment.suggestions,
            ),
            None => {
                tracing::debug!("Assessment was not JSON, using raw text");
                (FALLBACK_SCORE, response.content.clone(), Vec::new())
            }
        };

        Ok(Feedback {
            score,
            feedback,
            suggestions,
            provider_name: response.provider_name,
            response_time_ms: response.response_time_ms,
            from_cache: response.from_cache,
        })
    }

    /// Progressive hint for the exercise titled `title`.
    ///
    /// `level` is clamped to `1..=3`; level 1 is subtle, level 3 direct.
    pub async fn hint(&self, caller: &CallerId, title: &str, current_code: &str, level: u8) -> Result<Hint> {
        if title.trim().is_empty() {
            return Err(Error::invalid_request("Exercise title is required"));
        }
        let level = level.clamp(1, MAX_HINT_LEVEL);
        let code = if current_code.trim().is_empty() {
            "No code yet"
        } else {
            current_code
        };

        let prompt = format!(
            "The student is working on: \"{}\"\n\nCurrent code:\n```\n{}\n```\n\nProvide a hint (level {}/{}). Level 1 is subtle, Level 3 is more direct.",
            title, code, level, MAX_HINT_LEVEL
        );
        let response = self
            .ask(caller, InteractionKind::Hint, &prompt, HINT_PERSONA)
            .await?;

        Ok(Hint {
            hint: response.content,
            hint_level: level,
            next_hint_available: level < MAX_HINT_LEVEL,
            provider_name: response.provider_name,
        })
    }

    /// Answer a chat message in the light of recent history.
    pub async fn chat(&self, caller: &CallerId, message: &str, history: &[ChatMessage]) -> Result<ChatReply> {
        if message.trim().is_empty() {
            return Err(Error::invalid_request("Message is required"));
        }

        let recent = &history[history.len().saturating_sub(self.history_window)..];
        let mut prompt = String::new();
        if !recent.is_empty() {
            prompt.push_str("Previous conversation:\n");
            for entry in recent {
                prompt.push_str(&format!("{}: {}\n", entry.role, entry.content));
            }
            prompt.push('\n');
        }
        prompt.push_str("Student: ");
        prompt.push_str(message);

        let response = self
            .ask(caller, InteractionKind::Chat, &prompt, CHAT_PERSONA)
            .await?;

        Ok(ChatReply {
            response: response.content,
            conversation_id: uuid::Uuid::new_v4(),
            provider_name: response.provider_name,
            tokens_used: response.tokens_used,
        })
    }

    async fn ask(
        &self,
        caller: &CallerId,
        kind: InteractionKind,
        prompt: &str,
        persona: &str,
    ) -> Result<AiResponse> {
        self.quota.check(caller)?;

        let context = AiContext::default().system_prompt(persona);
        let response = self.orchestrator.get_response(prompt, Some(&context)).await?;

        let record = InteractionRecord::from_response(caller.clone(), kind, &response);
        if let Err(e) = self.usage.record(record).await {
            tracing::warn!(caller = %caller, error = %e, "Failed to record AI usage");
        }
        Ok(response)
    }
}
