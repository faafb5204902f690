//! Client for the State Service, used by the worker pipeline and the plugin
//! coordinator. Progress and event pings are fire-and-forget: the caller
//! never blocks on, or observes, the outcome.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;

use crate::models::{EventType, MarkProcessedRequest, SearchRequest};

#[derive(Debug, Deserialize)]
struct PendingResponse {
    searches: Vec<SearchRequest>,
}

/// Thin reqwest wrapper over the State Service endpoints.
#[derive(Clone)]
pub struct StateApi {
    client: reqwest::Client,
    base_url: Arc<String>,
}

impl StateApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            client,
            base_url: Arc::new(base_url.into()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Unprocessed search requests in insertion order.
    pub async fn pending(&self) -> Result<Vec<SearchRequest>> {
        let response = self
            .client
            .get(self.url("/pending"))
            .send()
            .await
            .context("fetching /pending")?
            .error_for_status()
            .context("/pending returned an error status")?;
        let body: PendingResponse = response.json().await.context("parsing /pending body")?;
        Ok(body.searches)
    }

    /// Mark requests processed. At-least-once from the caller's side; the
    /// State Service applies the mark idempotently.
    pub async fn mark_processed(&self, request: &MarkProcessedRequest) -> Result<()> {
        let body = json!({
            "timestamp": request.timestamp,
            "search_ids": request.search_ids,
        });
        self.client
            .post(self.url("/mark-processed"))
            .json(&body)
            .send()
            .await
            .context("posting /mark-processed")?
            .error_for_status()
            .context("/mark-processed returned an error status")?;
        Ok(())
    }

    /// Post a progress update without waiting for the outcome.
    pub fn update_progress_detached(
        &self,
        track_id: &str,
        filename: &str,
        percent: f64,
        bytes_done: u64,
        bytes_total: u64,
    ) {
        let client = self.clone();
        let body = json!({
            "track_id": track_id,
            "filename": filename,
            "percent": percent,
            "bytes_done": bytes_done,
            "bytes_total": bytes_total,
        });
        tokio::spawn(async move {
            if let Err(error) = client.post_ignoring_body("/progress", &body).await {
                tracing::debug!(%error, "Progress ping failed");
            }
        });
    }

    /// Emit a console event without waiting for the outcome.
    pub fn emit_event_detached(&self, kind: EventType, message: String, track_id: Option<String>) {
        let client = self.clone();
        let body = json!({
            "type": kind,
            "message": message,
            "track_id": track_id,
        });
        tokio::spawn(async move {
            if let Err(error) = client.post_ignoring_body("/event", &body).await {
                tracing::debug!(%error, "Event ping failed");
            }
        });
    }

    /// Drop the progress entry for a finished track, fire-and-forget.
    pub fn remove_progress_detached(&self, track_id: String) {
        let client = self.clone();
        tokio::spawn(async move {
            let body = json!({ "track_id": track_id });
            if let Err(error) = client.post_ignoring_body("/remove-progress", &body).await {
                tracing::debug!(%error, "Progress removal failed");
            }
        });
    }

    async fn post_ignoring_body(&self, path: &str, body: &serde_json::Value) -> Result<()> {
        self.client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .with_context(|| format!("posting {path}"))?
            .error_for_status()
            .with_context(|| format!("{path} returned an error status"))?;
        Ok(())
    }
}
