//! Execution target backends
//!
//! The Adapter tier is the only caller of this module. A backend turns one
//! dispatch into a call against a concrete execution target and returns the
//! target's JSON answer.

pub mod http;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::{
    error::AppResult,
    rules::{RuleSet, TargetId},
};

pub use http::HttpBackend;

/// One invocation of an execution target
#[derive(Debug, Clone, Serialize)]
pub struct BackendCall {
    pub correlation_id: Uuid,
    pub target: TargetId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    pub payload: Arc<Value>,
    /// Budget left for this call
    #[serde(rename = "timeout_ms", serialize_with = "serialize_millis")]
    pub timeout: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Trait for execution target backends
///
/// Implementations must map every target-side failure to
/// [`AppError::Backend`](crate::error::AppError::Backend) so the caller can
/// tell it apart from routing and wiring errors.
#[async_trait]
pub trait TargetBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    async fn invoke(&self, call: BackendCall) -> AppResult<Value>;
}

/// Backends keyed by target id
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<TargetId, Arc<dyn TargetBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the backend of a target
    pub fn with(mut self, target: impl Into<TargetId>, backend: Arc<dyn TargetBackend>) -> Self {
        self.backends.insert(target.into(), backend);
        self
    }

    pub fn get(&self, target: &TargetId) -> Option<Arc<dyn TargetBackend>> {
        self.backends.get(target).cloned()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// HTTP backends for every target that declares an endpoint
    pub fn from_rules(rules: &RuleSet, client: reqwest::Client) -> Self {
        let mut registry = Self::new();
        for target in rules.targets() {
            match rules.endpoint(target) {
                Some(endpoint) => {
                    let backend = HttpBackend::new(client.clone(), target.clone(), endpoint);
                    registry = registry.with(target.clone(), Arc::new(backend));
                }
                None => warn!(
                    target_id = %target,
                    "Target has no endpoint, dispatches to it will fail"
                ),
            }
        }
        registry
    }
}
