//! Media job dispatch
//!
//! Submits detached image/video jobs and queries their status.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::models::{JobStatusReport, MediaParams};
use crate::conversation::MediaKind;

/// Dispatch errors
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Upstream error: status {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Initialization error: {0}")]
    Initialization(String),
}

#[async_trait]
pub trait MediaDispatch: Send + Sync {
    async fn submit_image_job(
        &self,
        prompt: &str,
        model_id: &str,
        params: &MediaParams,
    ) -> Result<String, DispatchError>;

    async fn submit_video_job(
        &self,
        prompt: &str,
        model_id: &str,
        params: &MediaParams,
    ) -> Result<String, DispatchError>;

    async fn status_of(&self, job_id: &str) -> Result<JobStatusReport, DispatchError>;
}

/// Submit a job of `kind`
pub async fn submit_job(
    dispatch: &dyn MediaDispatch,
    kind: MediaKind,
    prompt: &str,
    model_id: &str,
    params: &MediaParams,
) -> Result<String, DispatchError> {
    match kind {
        MediaKind::Image => dispatch.submit_image_job(prompt, model_id, params).await,
        MediaKind::Video => dispatch.submit_video_job(prompt, model_id, params).await,
    }
}

/// HTTP media service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MediaDispatchConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<SecretString>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_base_url() -> String { "http://localhost:8090".to_string() }
fn default_timeout_ms() -> u64 { 30_000 }

impl Default for MediaDispatchConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl MediaDispatchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    prompt: &'a str,
    model: &'a str,
    #[serde(flatten)]
    params: &'a MediaParams,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    job_id: String,
}

/// `MediaDispatch` over the media service's HTTP API
pub struct HttpMediaDispatch {
    http: Client,
    config: MediaDispatchConfig,
}

impl HttpMediaDispatch {
    pub fn new(config: MediaDispatchConfig) -> Result<Self, DispatchError> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| DispatchError::Initialization(e.to_string()))?;

        Ok(Self { http, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(api_key) => req.bearer_auth(api_key.expose_secret()),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, DispatchError> {
        let response = self.authorized(req).send().await.map_err(|e| {
            if e.is_timeout() {
                DispatchError::Timeout(e.to_string())
            } else {
                DispatchError::RequestFailed(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(DispatchError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }

    async fn submit(
        &self,
        path: &str,
        prompt: &str,
        model_id: &str,
        params: &MediaParams,
    ) -> Result<String, DispatchError> {
        let body = SubmitRequest {
            prompt,
            model: model_id,
            params,
        };
        debug!(path, model_id, "Submitting media job");

        let response = self.send(self.http.post(self.url(path)).json(&body)).await?;
        let submitted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| DispatchError::InvalidResponse(e.to_string()))?;

        Ok(submitted.job_id)
    }
}

#[async_trait]
impl MediaDispatch for HttpMediaDispatch {
    async fn submit_image_job(
        &self,
        prompt: &str,
        model_id: &str,
        params: &MediaParams,
    ) -> Result<String, DispatchError> {
        self.submit("/v1/images/jobs", prompt, model_id, params).await
    }

    async fn submit_video_job(
        &self,
        prompt: &str,
        model_id: &str,
        params: &MediaParams,
    ) -> Result<String, DispatchError> {
        self.submit("/v1/videos/jobs", prompt, model_id, params).await
    }

    async fn status_of(&self, job_id: &str) -> Result<JobStatusReport, DispatchError> {
        let url = self.url(&format!("/v1/jobs/{}", job_id));
        let response = self.send(self.http.get(url)).await?;

        response
            .json()
            .await
            .map_err(|e| DispatchError::InvalidResponse(e.to_string()))
    }
}
