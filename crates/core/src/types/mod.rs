//! Core type definitions for CodeMentor.
//!
//! Broken down into submodules: sandbox execution, AI tutoring, and the
//! project shape consumed from the persistence layer.

pub mod ai;
pub mod execution;
pub mod project;

pub use ai::*;
pub use execution::*;
pub use project::*;
