#![deny(unused)]
//! Sandboxed execution engine for CodeMentor.
//!
//! Learner HTML/CSS/JavaScript is checked by the safety validator, has its
//! loops guarded, and then runs inside an isolated boundary that shares no
//! memory with the host.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │  Playground                            │
//! │    validate → harden → execute         │
//! ├────────────────────────────────────────┤
//! │  SandboxContainer (host side)          │
//! │    correlation map, timeout, dispatch  │
//! │    ↕ envelopes { id, type, data }      │
//! ├────────────────────────────────────────┤
//! │  Boundary (JsBoundary thread)          │
//! │    fresh script realm per run          │
//! │    console shim, policy stubs          │
//! │    no network, no storage, no host     │
//! └────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use codementor_sandbox::{Playground, validate_code};
//!
//! let playground = Playground::new(&config.sandbox);
//! let report = playground.run(&ExecutionRequest::new(html, css, js)).await?;
//! ```

pub mod boundary;
pub mod container;
pub mod loop_guard;
pub mod playground;
pub mod policy;
pub mod protocol;
pub mod validator;

pub use boundary::{BoundaryHandle, BoundaryLauncher, BoundaryLimits, JsBoundary, MockBehavior, MockBoundary};
pub use container::{ContainerConfig, ContainerState, SandboxContainer};
pub use loop_guard::{harden_loops, DEFAULT_MAX_ITERATIONS};
pub use playground::{export_project, export_stored, ExportedProject, Playground, RunReport};
pub use policy::{ContentPolicy, ErrorBanner};
pub use protocol::{BoundaryId, Envelope, ErrorPayload, Message, Postbox, Posted, RequestId};
pub use validator::{sanitize_html, validate_code, SafetyValidator};
