//! Health probes
//!
//! A probe answers one question: is this target answering right now?

use async_trait::async_trait;
use tracing::debug;

use crate::error::{AppError, AppResult};

/// Liveness check for a single target or workflow component
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> AppResult<()>;
}

/// Probe that issues `GET <base_url>/health` and expects a 2xx answer
pub struct HttpProbe {
    client: reqwest::Client,
    target: String,
    url: String,
}

impl HttpProbe {
    pub fn new(client: reqwest::Client, target: impl Into<String>, base_url: &str) -> Self {
        Self {
            client,
            target: target.into(),
            url: format!("{}/health", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self) -> AppResult<()> {
        let response = self.client.get(&self.url).send().await.map_err(|e| {
            AppError::Backend {
                target: self.target.clone(),
                message: format!("probe request failed: {}", e),
            }
        })?;

        let status = response.status();
        debug!(target_id = %self.target, status = %status, "Probe response");

        if !status.is_success() {
            return Err(AppError::Backend {
                target: self.target.clone(),
                message: format!("probe returned HTTP {}", status),
            });
        }
        Ok(())
    }
}
