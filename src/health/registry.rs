//! Target health registry
//!
//! A single background task owns every [`HealthRecord`]. Dispatch chains,
//! the probe loop and the HTTP surface talk to it over an mpsc channel and
//! get answers back on oneshot channels, so updates to one record are
//! applied strictly one after another and never lost.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::error::{AppError, AppResult};
use crate::rules::RuleSet;

use super::{HealthProbe, HealthRecord, HealthState, HealthThresholds, Observation};

/// Commands understood by the registry task
enum Command {
    Observe {
        id: String,
        observation: Observation,
        /// Absent for fire-and-forget reports
        reply: Option<oneshot::Sender<AppResult<HealthRecord>>>,
    },
    Get {
        id: String,
        reply: oneshot::Sender<AppResult<HealthRecord>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<HealthRecord>>,
    },
}

/// Builder for [`HealthRegistry`]
pub struct HealthRegistryBuilder {
    thresholds: HealthThresholds,
    ids: Vec<String>,
    probes: Vec<(String, Arc<dyn HealthProbe>)>,
    probe_timeout: Duration,
    channel_buffer: usize,
}

impl HealthRegistryBuilder {
    /// Track an id without a probe; its state follows live traffic only
    pub fn track(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if !self.ids.contains(&id) {
            self.ids.push(id);
        }
        self
    }

    /// Track every target and workflow component a rule set declares
    pub fn track_rules(mut self, rules: &RuleSet) -> Self {
        for target in rules.targets() {
            self = self.track(target.as_str());
        }
        for component in rules.workflow_components().keys() {
            self = self.track(component.as_str());
        }
        self
    }

    /// Track an id and probe it on every `probe_all`.
    ///
    /// Only probed ids can become unreachable.
    pub fn probe(mut self, id: impl Into<String>, probe: Arc<dyn HealthProbe>) -> Self {
        let id = id.into();
        self = self.track(id.clone());
        self.probes.push((id, probe));
        self
    }

    /// Upper bound on a single probe (default: 2s)
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Start the registry task. Must be called inside a tokio runtime.
    pub fn spawn(self) -> HealthRegistry {
        let (sender, receiver) = mpsc::channel(self.channel_buffer);
        let records = self
            .ids
            .iter()
            .map(|id| {
                let record = HealthRecord::new(id.clone());
                let record = if self.probes.iter().any(|(probed, _)| probed == id) {
                    record.with_probe()
                } else {
                    record
                };
                (id.clone(), record)
            })
            .collect();

        tokio::spawn(run_registry(receiver, records, self.thresholds));

        HealthRegistry {
            sender,
            probes: Arc::new(self.probes),
            probe_timeout: self.probe_timeout,
            thresholds: self.thresholds,
        }
    }
}

/// Handle to the health registry task. Cheap to clone.
#[derive(Clone)]
pub struct HealthRegistry {
    sender: mpsc::Sender<Command>,
    probes: Arc<Vec<(String, Arc<dyn HealthProbe>)>>,
    probe_timeout: Duration,
    thresholds: HealthThresholds,
}

impl HealthRegistry {
    pub fn builder(thresholds: HealthThresholds) -> HealthRegistryBuilder {
        HealthRegistryBuilder {
            thresholds,
            ids: Vec::new(),
            probes: Vec::new(),
            probe_timeout: Duration::from_secs(2),
            channel_buffer: 1_024,
        }
    }

    pub fn thresholds(&self) -> HealthThresholds {
        self.thresholds
    }

    /// Feed the outcome of a real call into the state machine
    pub async fn report_outcome(&self, id: &str, success: bool) -> AppResult<HealthRecord> {
        let observation = if success {
            Observation::CallSucceeded
        } else {
            Observation::CallFailed
        };
        self.observe(id, observation).await
    }

    /// Feed a call outcome without waiting for the registry.
    ///
    /// For paths that may be cancelled right after reporting, such as a call
    /// cut off by its deadline. The report is queued before this returns.
    pub fn record_outcome(&self, id: &str, success: bool) {
        let observation = if success {
            Observation::CallSucceeded
        } else {
            Observation::CallFailed
        };
        let command = Command::Observe {
            id: id.to_string(),
            observation,
            reply: None,
        };
        if let Err(e) = self.sender.try_send(command) {
            warn!(target_id = %id, error = %e, "Dropped health report");
        }
    }

    /// Current record for an id
    pub async fn get_state(&self, id: &str) -> AppResult<HealthRecord> {
        let (reply, receiver) = oneshot::channel();
        self.send(Command::Get {
            id: id.to_string(),
            reply,
        })
        .await?;
        receiver.await.map_err(|_| registry_stopped())?
    }

    /// Whether the id may be called (healthy or degraded)
    pub async fn is_usable(&self, id: &str) -> AppResult<bool> {
        Ok(self.get_state(id).await?.state.is_usable())
    }

    /// Every record, sorted by id
    pub async fn snapshot(&self) -> AppResult<Vec<HealthRecord>> {
        let (reply, receiver) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        let mut records = receiver.await.map_err(|_| registry_stopped())?;
        records.sort_by(|a, b| a.target_id.cmp(&b.target_id));
        Ok(records)
    }

    /// Run every registered probe concurrently and record the results.
    ///
    /// Returns the updated records of the probed ids.
    #[instrument(skip(self), fields(probes = self.probes.len()))]
    pub async fn probe_all(&self) -> AppResult<Vec<HealthRecord>> {
        let timeout = self.probe_timeout;
        let results = join_all(self.probes.iter().map(|(id, probe)| async move {
            let outcome = match tokio::time::timeout(timeout, probe.probe()).await {
                Ok(Ok(())) => Observation::ProbeSucceeded,
                Ok(Err(e)) => {
                    debug!(target_id = %id, error = %e, "Probe failed");
                    Observation::ProbeFailed
                }
                Err(_) => {
                    debug!(
                        target_id = %id,
                        timeout_ms = timeout.as_millis() as u64,
                        "Probe timed out"
                    );
                    Observation::ProbeFailed
                }
            };
            (id.as_str(), outcome)
        }))
        .await;

        let mut records = Vec::with_capacity(results.len());
        for (id, observation) in results {
            records.push(self.observe(id, observation).await?);
        }
        Ok(records)
    }

    /// Probe on a fixed interval until the returned handle is aborted
    pub fn spawn_probe_loop(&self, interval: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        info!(
            interval_secs = interval.as_secs(),
            probes = registry.probes.len(),
            "Starting health probe loop"
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = registry.probe_all().await {
                    warn!(error = %e, "Health probe cycle aborted, stopping probe loop");
                    break;
                }
            }
        })
    }

    async fn observe(&self, id: &str, observation: Observation) -> AppResult<HealthRecord> {
        let (reply, receiver) = oneshot::channel();
        self.send(Command::Observe {
            id: id.to_string(),
            observation,
            reply: Some(reply),
        })
        .await?;
        receiver.await.map_err(|_| registry_stopped())?
    }

    async fn send(&self, command: Command) -> AppResult<()> {
        self.sender
            .send(command)
            .await
            .map_err(|_| registry_stopped())
    }
}

fn registry_stopped() -> AppError {
    AppError::Internal(anyhow::anyhow!("health registry task has stopped"))
}

/// Registry task: owns the records, applies commands in arrival order
async fn run_registry(
    mut receiver: mpsc::Receiver<Command>,
    mut records: HashMap<String, HealthRecord>,
    thresholds: HealthThresholds,
) {
    debug!(tracked = records.len(), "Health registry started");

    while let Some(command) = receiver.recv().await {
        match command {
            Command::Observe {
                id,
                observation,
                reply,
            } => {
                let result = match records.get_mut(&id) {
                    Some(record) => {
                        if let Some(previous) = record.observe(observation, &thresholds, Utc::now())
                        {
                            log_transition(record, previous, observation);
                        }
                        Ok(record.clone())
                    }
                    None => Err(AppError::UnknownTarget(id)),
                };
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            warn!(error = %e, "Unanswered health report failed");
                        }
                    }
                }
            }
            Command::Get { id, reply } => {
                let result = records
                    .get(&id)
                    .cloned()
                    .ok_or(AppError::UnknownTarget(id));
                let _ = reply.send(result);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(records.values().cloned().collect());
            }
        }
    }

    debug!("Health registry shutting down");
}

fn log_transition(record: &HealthRecord, previous: HealthState, observation: Observation) {
    metrics::counter!(
        "health_transitions_total",
        "target" => record.target_id.clone(),
        "to" => record.state.as_str()
    )
    .increment(1);

    match record.state {
        HealthState::Healthy => info!(
            target_id = %record.target_id,
            from = %previous,
            cause = ?observation,
            "Target recovered"
        ),
        HealthState::Degraded | HealthState::Unreachable => warn!(
            target_id = %record.target_id,
            from = %previous,
            to = %record.state,
            consecutive_failures = record.consecutive_failures,
            cause = ?observation,
            "Target health degraded"
        ),
    }
}
