//! Routing: weighted target selection and health-aware resolution

pub mod engine;
pub mod fallback;

pub use engine::{RoutingDecision, RoutingEngine};
pub use fallback::{FallbackResolver, ResolutionPath, ResolvedTarget};
