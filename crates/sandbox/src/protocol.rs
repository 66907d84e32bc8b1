//! Host ↔ boundary message contract.
//!
//! Every message is an [`Envelope`] `{ id, type, data }`. The host only ever
//! sends `execute`; a boundary answers with any number of `console`
//! envelopes followed by exactly one `result` or `error` for the same id.
//!
//! Boundaries never address the host directly. They post through a
//! [`Postbox`] the container hands them at launch, and the postbox stamps
//! each message with the boundary's id. The host compares that stamp with
//! the live boundary and drops anything else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

use codementor_core::{ConsoleEvent, ConsoleLevel, Error, ExecutionRequest, Result};

/// Correlation id of one execution request.
pub type RequestId = u64;

/// Identity of one launched boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundaryId(pub uuid::Uuid);

impl BoundaryId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for BoundaryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BoundaryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "boundary-{}", self.0)
    }
}

// =============================================================================
// Envelope
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: RequestId,
    #[serde(flatten)]
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Message {
    Execute(ExecutionRequest),
    Result(ResultPayload),
    Error(ErrorPayload),
    Console(ConsolePayload),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Execute(_) => "execute",
            Self::Result(_) => "result",
            Self::Error(_) => "error",
            Self::Console(_) => "console",
        }
    }
}

impl Envelope {
    pub fn execute(id: RequestId, request: ExecutionRequest) -> Self {
        Self {
            id,
            message: Message::Execute(request),
        }
    }

    pub fn result(id: RequestId, document: String) -> Self {
        Self {
            id,
            message: Message::Result(ResultPayload { document }),
        }
    }

    pub fn error(id: RequestId, payload: ErrorPayload) -> Self {
        Self {
            id,
            message: Message::Error(payload),
        }
    }

    pub fn console(id: RequestId, level: ConsoleLevel, data: Vec<String>) -> Self {
        Self {
            id,
            message: Message::Console(ConsolePayload {
                level,
                data,
                emitted_at: Utc::now(),
            }),
        }
    }
}

/// Successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultPayload {
    /// Rendered boundary document after the run.
    pub document: String,
}

/// Failed run: a thrown error, or an uncaught one with a location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colno: Option<u32>,
    /// Rendered document carrying the error banner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
}

impl ErrorPayload {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn into_error(self) -> Error {
        Error::Runtime {
            message: self.message,
            filename: self.filename,
            line: self.lineno,
            column: self.colno,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolePayload {
    pub level: ConsoleLevel,
    pub data: Vec<String>,
    #[serde(default = "Utc::now")]
    pub emitted_at: DateTime<Utc>,
}

impl From<ConsolePayload> for ConsoleEvent {
    fn from(payload: ConsolePayload) -> Self {
        Self {
            level: payload.level,
            parts: payload.data,
            emitted_at: payload.emitted_at,
        }
    }
}

// =============================================================================
// Transport
// =============================================================================

/// An envelope as received by the host, stamped with its sender.
#[derive(Debug, Clone)]
pub struct Posted {
    pub source: BoundaryId,
    pub envelope: Envelope,
}

/// Outbound channel of one boundary.
#[derive(Debug, Clone)]
pub struct Postbox {
    source: BoundaryId,
    tx: mpsc::UnboundedSender<Posted>,
}

impl Postbox {
    pub(crate) fn new(source: BoundaryId, tx: mpsc::UnboundedSender<Posted>) -> Self {
        Self { source, tx }
    }

    pub fn source(&self) -> BoundaryId {
        self.source
    }

    /// Deliver to the host. Fails only once the host has gone away.
    pub fn post(&self, envelope: Envelope) -> Result<()> {
        self.tx
            .send(Posted {
                source: self.source,
                envelope,
            })
            .map_err(|_| Error::boundary("host inbox closed"))
    }

    /// A postbox on the same transport claiming another source.
    #[cfg(test)]
    pub(crate) fn spoofed(&self, source: BoundaryId) -> Self {
        Self {
            source,
            tx: self.tx.clone(),
        }
    }
}
