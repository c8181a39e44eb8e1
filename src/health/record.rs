//! Health records and their state machine
//!
//! ```text
//! healthy --(failures >= degraded_after)--> degraded --(failures >= unreachable_after)--> unreachable
//!    ^                                         |                                              |
//!    +------------- any success ---------------+                                              |
//!    +------------------------------ successful probe only ----------------------------------+
//! ```
//!
//! Only a probe can bring a record back from `unreachable`, so ids without a
//! probe stop at `degraded`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Liveness of a target or workflow component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unreachable,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Unreachable => "unreachable",
        }
    }

    /// Degraded targets are still attempted
    pub fn is_usable(&self) -> bool {
        !matches!(self, HealthState::Unreachable)
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something the registry learned about a target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    CallSucceeded,
    CallFailed,
    ProbeSucceeded,
    ProbeFailed,
}

/// Failure counts that drive state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthThresholds {
    /// Consecutive failures before a healthy target is degraded (default: 1)
    pub degraded_after: u32,
    /// Consecutive failures before a target is unreachable (default: 3)
    pub unreachable_after: u32,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            degraded_after: 1,
            unreachable_after: 3,
        }
    }
}

/// Health of one target or workflow component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub target_id: String,
    pub state: HealthState,
    pub consecutive_failures: u32,
    /// Whether a probe watches this id
    #[serde(default)]
    pub probed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_probe_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_time: Option<DateTime<Utc>>,
}

impl HealthRecord {
    /// Unknown targets start healthy
    pub fn new(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            state: HealthState::Healthy,
            consecutive_failures: 0,
            probed: false,
            last_probe_time: None,
            last_success_time: None,
            last_failure_time: None,
        }
    }

    /// Mark the record as watched by a probe
    pub fn with_probe(mut self) -> Self {
        self.probed = true;
        self
    }

    /// Apply an observation.
    ///
    /// Returns the previous state when the state changed.
    pub fn observe(
        &mut self,
        observation: Observation,
        thresholds: &HealthThresholds,
        now: DateTime<Utc>,
    ) -> Option<HealthState> {
        let previous = self.state;

        match observation {
            Observation::CallSucceeded => {
                self.last_success_time = Some(now);
                // A lucky call does not bring an unreachable target back.
                if self.state != HealthState::Unreachable {
                    self.consecutive_failures = 0;
                    self.state = HealthState::Healthy;
                }
            }
            Observation::ProbeSucceeded => {
                self.last_probe_time = Some(now);
                self.last_success_time = Some(now);
                self.consecutive_failures = 0;
                self.state = HealthState::Healthy;
            }
            Observation::CallFailed | Observation::ProbeFailed => {
                if observation == Observation::ProbeFailed {
                    self.last_probe_time = Some(now);
                }
                self.last_failure_time = Some(now);
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.state = self.state_for_failures(thresholds);
            }
        }

        (self.state != previous).then_some(previous)
    }

    fn state_for_failures(&self, thresholds: &HealthThresholds) -> HealthState {
        if self.state == HealthState::Unreachable
            || (self.probed && self.consecutive_failures >= thresholds.unreachable_after)
        {
            HealthState::Unreachable
        } else if self.consecutive_failures >= thresholds.degraded_after {
            HealthState::Degraded
        } else {
            self.state
        }
    }
}
