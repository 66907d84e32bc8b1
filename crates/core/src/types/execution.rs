use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

// =============================================================================
// Source Languages
// =============================================================================

/// Language of an editor panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Html,
    Css,
    Javascript,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Css => "css",
            Self::Javascript => "javascript",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "html" => Ok(Self::Html),
            "css" => Ok(Self::Css),
            "js" | "javascript" => Ok(Self::Javascript),
            other => Err(format!("unknown language: {}", other)),
        }
    }
}

// =============================================================================
// Execution Types
// =============================================================================

/// Editor content submitted for one refresh cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub html: String,
    pub css: String,
    pub js: String,
}

impl ExecutionRequest {
    pub fn new(html: impl Into<String>, css: impl Into<String>, js: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            css: css.into(),
            js: js.into(),
        }
    }
}

/// Terminal outcome of exactly one execution request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    Success,
    RuntimeError {
        message: String,
        filename: Option<String>,
        line: Option<u32>,
        column: Option<u32>,
    },
    Timeout,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Fold the outcome of a container call into a result value.
    ///
    /// Errors that are not execution outcomes (superseded, aborted,
    /// boundary failures) are handed back unchanged.
    pub fn from_outcome(outcome: crate::Result<()>) -> crate::Result<Self> {
        match outcome {
            Ok(()) => Ok(Self::Success),
            Err(Error::Runtime {
                message,
                filename,
                line,
                column,
            }) => Ok(Self::RuntimeError {
                message,
                filename,
                line,
                column,
            }),
            Err(Error::ExecutionTimeout(_)) => Ok(Self::Timeout),
            Err(other) => Err(other),
        }
    }
}

/// Console method intercepted inside the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Error,
    Warn,
    Info,
}

impl ConsoleLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
        }
    }
}

impl FromStr for ConsoleLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "log" => Ok(Self::Log),
            "error" => Ok(Self::Error),
            "warn" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            other => Err(format!("unknown console level: {}", other)),
        }
    }
}

/// A console call forwarded out of the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleEvent {
    pub level: ConsoleLevel,
    /// Each argument stringified independently, in call order.
    pub parts: Vec<String>,
    pub emitted_at: DateTime<Utc>,
}

impl ConsoleEvent {
    pub fn new(level: ConsoleLevel, parts: Vec<String>) -> Self {
        Self {
            level,
            parts,
            emitted_at: Utc::now(),
        }
    }

    /// Parts joined the way a browser console prints them.
    pub fn text(&self) -> String {
        self.parts.join(" ")
    }
}

// =============================================================================
// Validation Types
// =============================================================================

/// Outcome of the static safety check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// `false` whenever `errors` is non-empty.
    pub safe: bool,
    pub errors: Vec<String>,
    /// Advisory only; never blocks execution.
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn new(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            safe: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// A report with no findings.
    pub fn clean() -> Self {
        Self::new(Vec::new(), Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_language_parsing() {
        assert_eq!("JS".parse::<Language>().unwrap(), Language::Javascript);
        assert_eq!("css".parse::<Language>().unwrap(), Language::Css);
        assert!("python".parse::<Language>().is_err());
    }

    #[test]
    fn test_execution_result_from_outcome() {
        assert_eq!(ExecutionResult::from_outcome(Ok(())).unwrap(), ExecutionResult::Success);
        assert_eq!(
            ExecutionResult::from_outcome(Err(Error::ExecutionTimeout(Duration::from_secs(10))))
                .unwrap(),
            ExecutionResult::Timeout
        );
        let runtime = ExecutionResult::from_outcome(Err(Error::runtime("boom"))).unwrap();
        assert!(matches!(runtime, ExecutionResult::RuntimeError { ref message, .. } if message == "boom"));
        assert!(ExecutionResult::from_outcome(Err(Error::Aborted)).is_err());
    }

    #[test]
    fn test_console_event_wire_shape() {
        let event = ConsoleEvent::new(ConsoleLevel::Warn, vec!["a".into(), "1".into()]);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["level"], "warn");
        assert_eq!(json["parts"][1], "1");
        assert!(json.get("emittedAt").is_some());
        assert_eq!(event.text(), "a 1");
    }

    #[test]
    fn test_validation_report_safety_follows_errors() {
        assert!(ValidationReport::clean().safe);
        assert!(!ValidationReport::new(vec!["x".into()], vec![]).safe);
        assert!(ValidationReport::new(vec![], vec!["w".into()]).safe);
    }
}
