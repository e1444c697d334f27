//! Bundled handler that forwards a task to an HTTP endpoint.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use cadence_core::{CadenceError, TaskHandler, TaskType};
use serde::Serialize;
use tracing::{debug, info};

pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookBody<'a> {
    task_type: &'a str,
    target_id: Option<&'a str>,
}

/// POSTs `{taskType, targetId}` to a fixed URL. Any 2xx response counts as
/// success; other statuses are a recoverable failure.
pub struct WebhookHandler {
    task_type: TaskType,
    url: String,
    headers: HashMap<String, String>,
    client: reqwest::Client,
}

impl WebhookHandler {
    pub fn new(
        task_type: TaskType,
        url: impl Into<String>,
        timeout: Duration,
        headers: HashMap<String, String>,
    ) -> Result<Self, CadenceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CadenceError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            task_type,
            url: url.into(),
            headers,
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TaskHandler for WebhookHandler {
    async fn handle(&self, target_record_id: Option<&str>) -> anyhow::Result<bool> {
        let body = WebhookBody {
            task_type: self.task_type.as_str(),
            target_id: target_record_id,
        };

        let mut request = self.client.post(&self.url).json(&body);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        debug!(url = %self.url, task_type = %self.task_type, "Calling webhook");
        let response = request
            .send()
            .await
            .with_context(|| format!("webhook request to {} failed", self.url))?;
        let status = response.status();
        info!(url = %self.url, status = status.as_u16(), "Webhook responded");
        Ok(status.is_success())
    }
}
