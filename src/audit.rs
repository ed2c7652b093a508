//! Structured audit events. Every gate decision, every act outcome and every
//! kill-switch trigger is emitted synchronously at the point of decision;
//! storage and querying live outside this crate.

use chrono::Utc;
use serde::Serialize;
use std::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    GateDecision {
        ts: String,
        action: String,
        tier: String,
        allowed: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    ActOutcome {
        ts: String,
        action: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    KillSwitch {
        ts: String,
    },
}

impl AuditEvent {
    pub fn gate(action: &str, tier: &str, allowed: bool, reason: Option<String>) -> Self {
        AuditEvent::GateDecision {
            ts: Utc::now().to_rfc3339(),
            action: action.to_string(),
            tier: tier.to_string(),
            allowed,
            reason,
        }
    }

    pub fn act(action: &str, success: bool, error: Option<String>) -> Self {
        AuditEvent::ActOutcome {
            ts: Utc::now().to_rfc3339(),
            action: action.to_string(),
            success,
            error,
        }
    }

    pub fn kill_switch() -> Self {
        AuditEvent::KillSwitch {
            ts: Utc::now().to_rfc3339(),
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Default sink: one structured log line per event under the `audit` target.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let json = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        info!(target: "audit", %json, "audit event");
    }
}

/// Recording sink for tests and scenario assertions.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().expect("audit sink poisoned").clone()
    }

    pub fn gate_denials(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, AuditEvent::GateDecision { allowed: false, .. }))
            .count()
    }
}

impl AuditSink for MemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        self.events.lock().expect("audit sink poisoned").push(event);
    }
}
