//! Best-effort webhook delivery for completed tasks.
//!
//! Delivery happens once per completion, is never retried, and a failure
//! only produces a log line. Tracking state is committed before any
//! delivery attempt, so a dead endpoint cannot lose a task.

use crate::domain::Task;
use anyhow::{Context, Result};
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// JSON body posted to the configured endpoint.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub id: i64,
    pub title: String,
    pub customer: String,
    pub project: String,
    pub billable: bool,
    pub start_time: String,
    pub end_time: Option<String>,
    /// Accumulated duration in milliseconds.
    pub duration: i64,
}

impl WebhookPayload {
    pub fn from_task(task: &Task) -> Self {
        Self {
            id: task.id.0,
            title: task.title.clone(),
            customer: task.customer.clone(),
            project: task.project.clone(),
            billable: task.billable,
            start_time: task.start_time.to_rfc3339(),
            end_time: task.end_time.map(|t| t.to_rfc3339()),
            duration: task.duration_ms,
        }
    }
}

/// Where completed-task payloads go. Swapped for a recorder in tests.
pub trait WebhookSink {
    fn deliver(&self, url: &str, payload: &WebhookPayload) -> Result<()>;
}

/// Real sink: a blocking POST with a short timeout.
pub struct HttpWebhook {
    client: reqwest::blocking::Client,
}

impl HttpWebhook {
    pub fn new() -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpWebhook {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookSink for HttpWebhook {
    fn deliver(&self, url: &str, payload: &WebhookPayload) -> Result<()> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .with_context(|| format!("Failed to reach webhook: {url}"))?;
        if !response.status().is_success() {
            warn!(status = %response.status(), url, "webhook endpoint rejected payload");
        }
        Ok(())
    }
}
