//! Five-tier dispatch
//!
//! Requests enter at the Product tier and travel down one tier at a time to
//! the Adapter, which calls the execution target. Results and failures travel
//! back up the same way.

pub mod handler;
pub mod message;
pub mod retry;
pub mod state;
pub mod supervisor;
pub mod tier;

pub use handler::{Downstream, TierHandler};
pub use message::{
    DispatchResponse, DispatchStatus, ErrorDetail, TierFault, TierReply, TierRequest,
};
pub use retry::RetryPolicy;
pub use state::DispatchState;
pub use supervisor::{DispatchOutcome, DispatchRequest, DispatchSupervisor, DispatchSupervisorBuilder};
pub use tier::Tier;
