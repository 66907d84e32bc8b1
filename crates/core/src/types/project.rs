use serde::{Deserialize, Serialize};
use std::fmt;

use super::execution::ExecutionRequest;

/// Identifier assigned by the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectId(pub String);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A saved playground project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub title: String,
    pub html: String,
    pub css: String,
    pub js: String,
}

impl Project {
    /// The editor content of this project as an execution request.
    pub fn to_request(&self) -> ExecutionRequest {
        ExecutionRequest::new(self.html.clone(), self.css.clone(), self.js.clone())
    }
}
