//! Diagnostic event types emitted by a relay operation.
//!
//! None of these are surfaced to the downstream client. They exist so that
//! skipped payloads and aborted streams can be observed and tested.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of non-fatal condition the relay hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// A payload line was not valid structured data and was skipped
    MalformedPayload,
    /// Reading from upstream failed after streaming began
    UpstreamReadError,
    /// A single upstream read exceeded the configured bound
    UpstreamTimeout,
    /// The downstream client went away mid-stream
    ClientDisconnected,
    /// Buffered bytes were dropped because the sentinel arrived first
    RemainderDiscarded,
}

/// One diagnostic record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayDiagnostic {
    /// Unique record ID
    pub id: Uuid,
    /// When the condition was observed
    pub timestamp: DateTime<Utc>,
    pub kind: DiagnosticKind,
    /// Human-readable description
    pub detail: String,
    /// The offending payload text, when there is one
    pub payload: Option<String>,
}

impl RelayDiagnostic {
    pub fn new(kind: DiagnosticKind, detail: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
            detail: detail.into(),
            payload: None,
        }
    }

    /// A payload that failed to decode
    pub fn malformed_payload(payload: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::MalformedPayload, error).with_payload(payload)
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Whether the relay kept going after this condition
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind,
            DiagnosticKind::MalformedPayload | DiagnosticKind::RemainderDiscarded
        )
    }
}
