//! Request lifecycle audit trail.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::util::clock::now_ms;
use crate::util::serde::ClientId;

/// Lifecycle step being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Request registered and queued.
    Submit,
    /// Priority class changed.
    Priority,
    /// Terminal outcome recorded.
    Finish,
    /// Request cancelled by its client.
    Cancel,
    /// Request removed by its client.
    Remove,
    /// Request rebuilt from the durable store.
    Reload,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Submit => "submit",
            Self::Priority => "priority",
            Self::Finish => "finish",
            Self::Cancel => "cancel",
            Self::Remove => "remove",
            Self::Reload => "reload",
        };
        f.write_str(name)
    }
}

/// Audit event structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Request identifier.
    pub identifier: String,
    /// Owning client.
    pub client: ClientId,
    /// Action taken.
    pub action: AuditAction,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// In-memory audit sink for testing and dev.
pub struct InMemoryAuditSink {
    events: VecDeque<AuditEvent>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.max_events == 0 {
            return;
        }
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Build an audit event stamped with the current time.
pub fn build_audit_event(
    client: &ClientId,
    identifier: impl Into<String>,
    action: AuditAction,
    detail: Option<String>,
) -> AuditEvent {
    let identifier = identifier.into();
    let created_at_ms = now_ms();
    AuditEvent {
        event_id: format!("{client}-{identifier}-{action}-{created_at_ms}"),
        identifier,
        client: client.clone(),
        action,
        created_at_ms,
        detail,
    }
}
