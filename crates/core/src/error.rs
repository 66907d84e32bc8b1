//! Error types for CodeMentor.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using CodeMentor's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Message shown to learners whenever the tutoring backends fail.
pub const ASSISTANT_UNAVAILABLE: &str =
    "The AI assistant is temporarily unavailable. Please try again later.";

/// Core error type for CodeMentor.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Unsafe code rejected: {}", .0.join("; "))]
    UnsafeCode(Vec<String>),

    // =========================================================================
    // Sandbox Errors
    // =========================================================================
    #[error("{message}")]
    Runtime {
        message: String,
        filename: Option<String>,
        line: Option<u32>,
        column: Option<u32>,
    },

    #[error("Execution timeout after {0:?}")]
    ExecutionTimeout(Duration),

    #[error("Execution superseded by a newer request")]
    Superseded,

    #[error("Execution aborted: sandbox destroyed")]
    Aborted,

    #[error("Sandbox container not initialized")]
    ContainerNotReady,

    #[error("Sandbox boundary error: {0}")]
    Boundary(String),

    // =========================================================================
    // Model Gateway Errors
    // =========================================================================
    #[error("Model provider error: {0}")]
    ModelProvider(String),

    #[error("All AI providers are currently unavailable. Please try again later.")]
    AllProvidersUnavailable,

    #[error("Rate limit exceeded for {caller}: {limit} requests per window")]
    RateLimited { caller: String, limit: u32 },

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a runtime error without location information.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
            filename: None,
            line: None,
            column: None,
        }
    }

    /// Create a boundary error.
    pub fn boundary(msg: impl Into<String>) -> Self {
        Self::Boundary(msg.into())
    }

    /// Create a model provider error.
    pub fn model_provider(msg: impl Into<String>) -> Self {
        Self::ModelProvider(msg.into())
    }

    /// Create an invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error came from a single tutoring backend or the whole
    /// provider chain.
    pub fn is_provider_failure(&self) -> bool {
        matches!(self, Self::ModelProvider(_) | Self::AllProvidersUnavailable)
    }

    /// Text safe to show to a learner.
    ///
    /// Provider failures never leak backend names or transport details.
    pub fn user_message(&self) -> String {
        match self {
            Self::UnsafeCode(reasons) => {
                let mut text = String::from("Your code was not run for safety reasons:");
                for reason in reasons {
                    text.push_str("\n- ");
                    text.push_str(reason);
                }
                text
            }
            Self::Runtime {
                message,
                line: Some(line),
                column,
                ..
            } => format!("{} (line {}, column {})", message, line, column.unwrap_or(0)),
            Self::Runtime { message, .. } => message.clone(),
            Self::ExecutionTimeout(_) => {
                "Your code took too long to run. It may be stuck in a loop.".to_string()
            }
            Self::ModelProvider(_) | Self::AllProvidersUnavailable => {
                ASSISTANT_UNAVAILABLE.to_string()
            }
            Self::RateLimited { .. } => {
                "You have reached today's assistant limit. Try again tomorrow.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
