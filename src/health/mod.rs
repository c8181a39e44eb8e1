//! Target health tracking
//!
//! Tracks healthy / degraded / unreachable per execution target and per
//! workflow component. State is driven by periodic probes and by the outcome
//! of every dispatched call.

pub mod probe;
pub mod record;
pub mod registry;

pub use probe::{HealthProbe, HttpProbe};
pub use record::{HealthRecord, HealthState, HealthThresholds, Observation};
pub use registry::{HealthRegistry, HealthRegistryBuilder};
