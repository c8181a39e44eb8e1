//! Scripted backends and probes for tests
//!
//! Only compiled with the `test-utils` feature (or in unit tests).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{
    backend::{BackendCall, TargetBackend},
    error::{AppError, AppResult},
    health::HealthProbe,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Succeed,
    Fail,
}

/// Backend whose answers are scripted in advance.
///
/// Queued steps are consumed first; once the queue is empty every call
/// gets the default answer.
pub struct ScriptedBackend {
    name: String,
    queue: Mutex<VecDeque<Step>>,
    default: Step,
    delay: Option<Duration>,
    calls: AtomicUsize,
    seen: Mutex<Vec<BackendCall>>,
}

impl ScriptedBackend {
    /// Backend that always answers `{"served_by": name, ...}`
    pub fn ok(name: impl Into<String>) -> Self {
        Self::with_default(name, Step::Succeed)
    }

    /// Backend that always fails with a backend error
    pub fn failing(name: impl Into<String>) -> Self {
        Self::with_default(name, Step::Fail)
    }

    fn with_default(name: impl Into<String>, default: Step) -> Self {
        Self {
            name: name.into(),
            queue: Mutex::new(VecDeque::new()),
            default,
            delay: None,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Fail the next `times` calls before falling back to the default
    pub fn then_fail(self, times: usize) -> Self {
        self.push(Step::Fail, times)
    }

    /// Succeed the next `times` calls before falling back to the default
    pub fn then_succeed(self, times: usize) -> Self {
        self.push(Step::Succeed, times)
    }

    fn push(self, step: Step, times: usize) -> Self {
        {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.extend(std::iter::repeat(step).take(times));
        }
        self
    }

    /// Sleep this long before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every call received, in arrival order
    pub fn seen(&self) -> Vec<BackendCall> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl TargetBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, call: BackendCall) -> AppResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(self.default);

        let answer = json!({
            "served_by": self.name,
            "model": call.model,
            "component": call.component,
        });
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match step {
            Step::Succeed => Ok(answer),
            Step::Fail => Err(AppError::Backend {
                target: self.name.clone(),
                message: "scripted failure".to_string(),
            }),
        }
    }
}

/// Probe that reports whatever it was last told
pub struct ScriptedProbe {
    up: AtomicBool,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(up: bool) -> Self {
        Self {
            up: AtomicBool::new(up),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self) -> AppResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.up.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::Backend {
                target: "scripted".to_string(),
                message: "probe reported down".to_string(),
            })
        }
    }
}
