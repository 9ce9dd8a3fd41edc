//! HTTP client for the pipewright server.

use anyhow::{Result, bail};
use pipewright_core::ResourceId;
use pipewright_core::report::PipelineStatusReport;
use reqwest::RequestBuilder;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveJobs {
    pub active_job_count: usize,
    pub active_job_ids: Vec<ResourceId>,
}

#[derive(Debug, Deserialize)]
struct CancelResponse {
    cancelled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnqueueResponse {
    message_id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    pub async fn pipeline_status(
        &self,
        pipeline: &str,
        run: Option<&str>,
    ) -> Result<PipelineStatusReport> {
        let pipeline = urlencoding::encode(pipeline);
        let path = match run {
            Some(run) => format!(
                "/pipelines/{}/runs/{}/status",
                pipeline,
                urlencoding::encode(run)
            ),
            None => format!("/pipelines/{}/status", pipeline),
        };
        send(self.http.get(self.url(&path))).await
    }

    pub async fn active_jobs(&self) -> Result<ActiveJobs> {
        send(self.http.get(self.url("/worker/jobs"))).await
    }

    pub async fn cancel_job(&self, id: &str) -> Result<bool> {
        let path = format!("/worker/jobs/{}/cancel", urlencoding::encode(id));
        let response: CancelResponse = send(self.http.post(self.url(&path))).await?;
        Ok(response.cancelled)
    }

    /// Returns the id of the published message.
    pub async fn enqueue_job(&self, id: &str) -> Result<String> {
        let path = format!("/worker/jobs/{}/enqueue", urlencoding::encode(id));
        let response: EnqueueResponse = send(self.http.post(self.url(&path))).await?;
        Ok(response.message_id)
    }
}

async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
    let response = request.send().await?;
    let status = response.status();
    debug!(url = %response.url(), status = %status, "API response");

    if !status.is_success() {
        let message = response
            .json::<ErrorBody>()
            .await
            .map(|body| body.error)
            .unwrap_or_else(|_| "no error message".to_string());
        bail!("{} ({})", message, status);
    }

    Ok(response.json().await?)
}
