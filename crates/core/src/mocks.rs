//! In-memory implementations of the collaborator traits.
//!
//! Used by tests across the workspace and by the CLI when no external
//! persistence is configured.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::{
    traits::{ProjectStore, UsageSink},
    types::{InteractionKind, InteractionRecord, Project, ProjectId},
    Error, Result,
};

// =============================================================================
// Project Store
// =============================================================================

/// Project store backed by a map.
#[derive(Default)]
pub struct InMemoryProjectStore {
    projects: Mutex<HashMap<ProjectId, Project>>,
}

impl InMemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a project under a known id.
    pub fn insert(&self, id: ProjectId, project: Project) {
        self.projects.lock().insert(id, project);
    }

    pub fn len(&self) -> usize {
        self.projects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.lock().is_empty()
    }
}

#[async_trait]
impl ProjectStore for InMemoryProjectStore {
    async fn load_project(&self, id: &ProjectId) -> Result<Project> {
        self.projects
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::ProjectNotFound(id.to_string()))
    }

    async fn save_project(&self, project: &Project) -> Result<ProjectId> {
        let id = ProjectId(uuid::Uuid::new_v4().to_string());
        self.projects.lock().insert(id.clone(), project.clone());
        Ok(id)
    }
}

// =============================================================================
// Usage Sink
// =============================================================================

/// Usage sink that keeps every record.
#[derive(Default)]
pub struct InMemoryUsageSink {
    records: Mutex<Vec<InteractionRecord>>,
}

impl InMemoryUsageSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<InteractionRecord> {
        self.records.lock().clone()
    }

    pub fn count_of(&self, kind: InteractionKind) -> usize {
        self.records.lock().iter().filter(|r| r.kind == kind).count()
    }
}

#[async_trait]
impl UsageSink for InMemoryUsageSink {
    async fn record(&self, record: InteractionRecord) -> Result<()> {
        tracing::debug!(
            caller = %record.caller,
            provider = %record.provider_name,
            from_cache = record.from_cache,
            "Usage recorded"
        );
        self.records.lock().push(record);
        Ok(())
    }
}
