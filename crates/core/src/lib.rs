#![deny(unused)]
//! Core types, traits, and error definitions for CodeMentor.
//!
//! This crate provides the foundational building blocks shared by the sandbox
//! execution engine and the AI model gateway.

pub mod config;
pub mod error;
pub mod mocks;
pub mod telemetry;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::*;
pub use types::*;
