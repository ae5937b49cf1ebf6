//! RunPod serverless job queue client.

use crate::error::{sanitize_error_message, ReflectError, Result};
use crate::job::api::JobApi;
use crate::job::types::{FeedbackVote, GenerationRequest, JobHandle, StatusReport, Vote};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Default RunPod API base.
pub const DEFAULT_BASE_URL: &str = "https://api.runpod.ai/v2";

/// Builder for [`RunPodClient`].
#[derive(Debug, Clone)]
pub struct RunPodClientBuilder {
    api_key: Option<String>,
    endpoint_id: Option<String>,
    base_url: String,
    request_timeout: Duration,
}

impl Default for RunPodClientBuilder {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint_id: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl RunPodClientBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key. Falls back to `RUNPOD_API_KEY` env var.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the serverless endpoint id. Falls back to `RUNPOD_ENDPOINT_ID` env var.
    pub fn endpoint_id(mut self, id: impl Into<String>) -> Self {
        self.endpoint_id = Some(id.into());
        self
    }

    /// Overrides the API base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets the timeout applied to each individual HTTP request.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Builds the client, resolving credentials.
    pub fn build(self) -> Result<RunPodClient> {
        let api_key = self
            .api_key
            .or_else(|| std::env::var("RUNPOD_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                ReflectError::Auth("RUNPOD_API_KEY not set and no API key provided".into())
            })?;

        let endpoint_id = self
            .endpoint_id
            .or_else(|| std::env::var("RUNPOD_ENDPOINT_ID").ok())
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ReflectError::InvalidConfig(
                    "RUNPOD_ENDPOINT_ID not set and no endpoint id provided".into(),
                )
            })?;

        let base_url = self.base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ReflectError::InvalidConfig("base URL is empty".into()));
        }

        let client = reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()?;

        Ok(RunPodClient {
            client,
            api_key,
            endpoint_id,
            base_url,
        })
    }
}

/// RunPod serverless job queue client.
///
/// Jobs go to `{base}/{endpoint}/run` and are polled at
/// `{base}/{endpoint}/status/{id}`. Feedback votes reuse the run endpoint.
pub struct RunPodClient {
    client: reqwest::Client,
    api_key: String,
    endpoint_id: String,
    base_url: String,
}

impl RunPodClient {
    /// Creates a new [`RunPodClientBuilder`].
    pub fn builder() -> RunPodClientBuilder {
        RunPodClientBuilder::new()
    }

    /// URL jobs and feedback are posted to.
    pub fn submit_url(&self) -> String {
        format!("{}/{}/run", self.base_url, self.endpoint_id)
    }

    /// URL the status of `job_id` is read from.
    pub fn status_url(&self, job_id: &str) -> String {
        format!("{}/{}/status/{}", self.base_url, self.endpoint_id, job_id)
    }

    /// Maps a non-success submission response. 401/403 become [`ReflectError::Auth`].
    fn parse_error(&self, status: u16, text: &str) -> ReflectError {
        if status == 401 || status == 403 {
            return ReflectError::Auth(error_detail(text));
        }
        ReflectError::Submission(describe_failure(status, text))
    }

    async fn post_input(&self, body: &RunRequest<'_>) -> reqwest::Result<reqwest::Response> {
        self.client
            .post(self.submit_url())
            .header("Authorization", &self.api_key)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
    }
}

fn error_detail(text: &str) -> String {
    match serde_json::from_str::<RunPodErrorResponse>(text) {
        Ok(resp) => sanitize_error_message(&resp.error),
        Err(_) => sanitize_error_message(text),
    }
}

fn describe_failure(status: u16, text: &str) -> String {
    let detail = error_detail(text);
    if detail.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {detail}")
    }
}

/// Pulls the job id out of a submission response body.
fn parse_submit_body(text: &str) -> Result<JobHandle> {
    let body: Value = serde_json::from_str(text)
        .map_err(|e| ReflectError::Submission(format!("response was not valid JSON: {e}")))?;

    body.get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(JobHandle::new)
        .ok_or_else(|| ReflectError::Submission("No job ID returned".into()))
}

#[async_trait]
impl JobApi for RunPodClient {
    async fn submit(&self, request: &GenerationRequest) -> Result<JobHandle> {
        let body = RunRequest::job(request);

        let response = self
            .post_input(&body)
            .await
            .map_err(|e| ReflectError::Submission(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ReflectError::Submission(e.to_string()))?;
        tracing::debug!(
            status = status.as_u16(),
            body = %sanitize_error_message(&text),
            "run response"
        );

        if !status.is_success() {
            return Err(self.parse_error(status.as_u16(), &text));
        }

        parse_submit_body(&text)
    }

    async fn status(&self, handle: &JobHandle) -> Result<StatusReport> {
        let response = self
            .client
            .get(self.status_url(&handle.id))
            .header("Authorization", &self.api_key)
            .send()
            .await
            .map_err(|e| ReflectError::Poll(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ReflectError::Poll(describe_failure(status.as_u16(), &text)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ReflectError::Poll(format!("invalid status body: {e}")))?;

        Ok(StatusReport::from_body(body))
    }

    async fn send_feedback(&self, vote: &FeedbackVote) -> Result<()> {
        let body = RunRequest::feedback(vote);

        let response = self
            .post_input(&body)
            .await
            .map_err(|e| ReflectError::Feedback(e.to_string()))?;

        if !response.status().is_success() {
            tracing::warn!(
                status = response.status().as_u16(),
                vote = %vote.vote,
                "feedback endpoint returned non-success status"
            );
        }

        Ok(())
    }
}

// -- Request types --

#[derive(Debug, Serialize)]
struct RunRequest<'a> {
    input: RunInput<'a>,
}

#[derive(Debug, Serialize)]
struct RunInput<'a> {
    prompt: &'a str,
    style_img_b64: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    feedback: Option<Vote>,
}

impl<'a> RunRequest<'a> {
    fn job(req: &'a GenerationRequest) -> Self {
        Self {
            input: RunInput {
                prompt: &req.prompt,
                style_img_b64: &req.style_image_b64,
                feedback: None,
            },
        }
    }

    fn feedback(vote: &'a FeedbackVote) -> Self {
        Self {
            input: RunInput {
                prompt: &vote.prompt,
                style_img_b64: &vote.style_image_b64,
                feedback: Some(vote.vote),
            },
        }
    }
}

// -- Response types --

#[derive(Debug, Deserialize)]
struct RunPodErrorResponse {
    error: String,
}
