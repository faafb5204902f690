//! Client for the Worker Service, used by the plugin coordinator's
//! completion hook.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::models::{
    EnsureAlbumFolderRequest, EnsureAlbumFolderResponse, ProcessMetadataRequest,
    ProcessMetadataResponse,
};

/// Thin reqwest wrapper over the Worker Service endpoints.
///
/// The worker acks `/process-metadata` after rename+move only, so a modest
/// timeout covers filesystem latency without ever waiting on tag writing.
#[derive(Clone)]
pub struct WorkerApi {
    client: reqwest::Client,
    base_url: Arc<String>,
}

impl WorkerApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
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

    pub async fn process_metadata(
        &self,
        request: &ProcessMetadataRequest,
    ) -> Result<ProcessMetadataResponse> {
        let response = self
            .client
            .post(self.url("/process-metadata"))
            .json(request)
            .send()
            .await
            .context("posting /process-metadata")?
            .error_for_status()
            .context("/process-metadata returned an error status")?;
        response
            .json()
            .await
            .context("parsing /process-metadata body")
    }

    pub async fn ensure_album_folder(
        &self,
        request: &EnsureAlbumFolderRequest,
    ) -> Result<EnsureAlbumFolderResponse> {
        let response = self
            .client
            .post(self.url("/ensure-album-folder"))
            .json(request)
            .send()
            .await
            .context("posting /ensure-album-folder")?
            .error_for_status()
            .context("/ensure-album-folder returned an error status")?;
        response
            .json()
            .await
            .context("parsing /ensure-album-folder body")
    }
}
