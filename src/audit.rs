//! Decision audit log
//!
//! Bounded in-memory ring of the most recent routing decisions and how their
//! dispatch ended. Oldest entries are dropped first.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    dispatch::DispatchStatus,
    profile::Dimension,
    routing::ResolutionPath,
    rules::TargetId,
};

/// One audited dispatch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub recorded_at: DateTime<Utc>,
    pub correlation_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chosen_target: Option<TargetId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_target: Option<TargetId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ResolutionPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub special_category: Option<String>,
    pub contributing_dimensions: Vec<Dimension>,
    pub status: DispatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

/// Bounded decision log
pub struct DecisionLog {
    capacity: usize,
    entries: Mutex<VecDeque<AuditEntry>>,
}

impl DecisionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record(&self, entry: AuditEntry) {
        if self.capacity == 0 {
            return;
        }
        // A panic while holding the lock cannot leave the ring half-written.
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Most recent entries, newest first
    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
