//! Core traits for CodeMentor.
//!
//! These traits define the seams between the sandbox core and its
//! collaborators: remote AI backends, the persistence layer, and the
//! analytics sink.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{AiContext, AiResponse, InteractionRecord, Project, ProjectId};

// =============================================================================
// Model Gateway Traits
// =============================================================================

/// A remote text-completion backend.
///
/// Implementations normalize whatever the backend returns into
/// [`AiResponse`]; backend-specific fields never cross this trait.
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Stable provider name, used as the circuit breaker key.
    fn name(&self) -> &str;

    /// Lower values are tried first.
    fn priority(&self) -> u32;

    /// Lightweight pre-flight probe.
    async fn is_healthy(&self) -> bool;

    /// Issue one completion call.
    async fn call(&self, prompt: &str, context: Option<&AiContext>) -> Result<AiResponse>;
}

// =============================================================================
// Collaborator Traits
// =============================================================================

/// Persistence layer for playground projects.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn load_project(&self, id: &ProjectId) -> Result<Project>;

    async fn save_project(&self, project: &Project) -> Result<ProjectId>;
}

/// Receiver of AI usage analytics.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, record: InteractionRecord) -> Result<()>;
}
