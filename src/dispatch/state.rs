//! Per-request dispatch state machine
//!
//! ```text
//! Created -> Forwarded(t) -> Awaiting(t) -> Forwarded(next) -> ... -> Completed
//!                                       \-> Failed
//!                                       \-> TimedOut
//! ```

use serde::Serialize;

use super::Tier;

/// Where a dispatch chain currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "tier")]
pub enum DispatchState {
    Created,
    /// Handed to a tier, not yet acknowledged
    Forwarded(Tier),
    /// A tier is working on it
    Awaiting(Tier),
    Completed,
    Failed,
    TimedOut,
}

impl DispatchState {
    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: DispatchState) -> bool {
        use DispatchState::*;

        match (*self, next) {
            (Created, Forwarded(Tier::Product)) => true,
            (Forwarded(a), Awaiting(b)) => a == b,
            (Awaiting(a), Forwarded(b)) => a.may_call(b),
            (Awaiting(_), Completed | Failed | TimedOut) => true,
            // Refused before any tier accepted it
            (Created | Forwarded(_), Failed | TimedOut) => true,
            _ => false,
        }
    }

    /// Move to `next`, or report the illegal transition
    pub fn advance(&mut self, next: DispatchState) -> Result<(), String> {
        if !self.can_transition_to(next) {
            return Err(format!("illegal dispatch transition {:?} -> {:?}", self, next));
        }
        *self = next;
        Ok(())
    }
}
