//! HTTP execution target backend
//!
//! Posts the call to `<endpoint>/invoke` and returns the JSON body.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, instrument};

use crate::{
    error::{AppError, AppResult},
    rules::TargetId,
};

use super::{BackendCall, TargetBackend};

/// Backend talking to a target over HTTP
pub struct HttpBackend {
    client: reqwest::Client,
    target: TargetId,
    url: String,
}

impl HttpBackend {
    pub fn new(client: reqwest::Client, target: TargetId, endpoint: &str) -> Self {
        Self {
            client,
            target,
            url: format!("{}/invoke", endpoint.trim_end_matches('/')),
        }
    }

    fn failure(&self, message: String) -> AppError {
        AppError::Backend {
            target: self.target.to_string(),
            message,
        }
    }
}

#[async_trait]
impl TargetBackend for HttpBackend {
    fn name(&self) -> &str {
        self.target.as_str()
    }

    #[instrument(
        skip(self, call),
        fields(target_id = %self.target, correlation_id = %call.correlation_id)
    )]
    async fn invoke(&self, call: BackendCall) -> AppResult<Value> {
        debug!(
            url = %self.url,
            model = ?call.model,
            timeout_ms = call.timeout.as_millis() as u64,
            "Invoking target"
        );

        let response = self
            .client
            .post(&self.url)
            .timeout(call.timeout)
            .json(&call)
            .send()
            .await
            .map_err(|e| {
                error!(url = %self.url, error = %e, "Failed to reach target");
                self.failure(format!("request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(url = %self.url, status = %status, "Target returned an error");
            return Err(self.failure(format!("HTTP {}: {}", status, body)));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| self.failure(format!("invalid response body: {}", e)))
    }
}
