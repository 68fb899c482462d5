use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, RequestBuilder, Response};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use super::{PreparedRun, ProxiedResponse, WorkerBackend, WorkerError, WorkerReport};
use crate::config::{AppConfig, WorkerMode};
use crate::models::artifact::{Locator, MediaArtifact};
use crate::models::job::MatchJob;

const UNAVAILABLE: &str =
    "Worker service is not available. Please make sure the recognition service is running.";

#[derive(Deserialize)]
struct ProcessAccepted {
    task_id: String,
}

/// Client for a recognition worker running as a standalone HTTP service.
pub struct RemoteServiceBackend {
    http: Client,
    base_url: String,
    media_root: PathBuf,
    liveness_timeout: Duration,
}

impl RemoteServiceBackend {
    /// Every request is bounded by `request_timeout`; liveness probes use the
    /// shorter `liveness_timeout`.
    pub fn new(
        base_url: impl Into<String>,
        media_root: PathBuf,
        liveness_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, WorkerError> {
        let http = Client::builder().timeout(request_timeout).build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            media_root,
            liveness_timeout,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, WorkerError> {
        Self::new(
            config.worker_base_url.clone(),
            config.media_root.clone(),
            config.liveness_timeout(),
            config.worker_request_timeout(),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request, counting transport failures.
    async fn send(&self, request: RequestBuilder) -> Result<Response, WorkerError> {
        request.send().await.map_err(|e| {
            metrics::counter!("worker_transport_errors_total").increment(1);
            WorkerError::Transport(e)
        })
    }

    /// Upload part streaming the artifact's bytes from disk or its URL.
    async fn artifact_part(
        &self,
        artifact: &MediaArtifact,
        missing: &str,
        fallback_name: &str,
    ) -> Result<Part, WorkerError> {
        let not_found = || WorkerError::ResourceMissing(missing.to_string());

        let part = match artifact.locator() {
            Locator::Url(url) => {
                let response = self.http.get(&url).send().await.map_err(|_| not_found())?;
                if !response.status().is_success() {
                    return Err(not_found());
                }
                let length = response.content_length();
                let body = Body::wrap_stream(response.bytes_stream());
                match length {
                    Some(length) => Part::stream_with_length(body, length),
                    None => Part::stream(body),
                }
            }
            locator => {
                let path = locator.resolve_path(&self.media_root).ok_or_else(not_found)?;
                let file = tokio::fs::File::open(&path).await.map_err(|_| not_found())?;
                let length = file.metadata().await.map_err(|_| not_found())?.len();
                Part::stream_with_length(Body::from(file), length)
            }
        };

        Ok(part.file_name(artifact.file_name(fallback_name)))
    }
}

#[async_trait]
impl WorkerBackend for RemoteServiceBackend {
    fn mode(&self) -> WorkerMode {
        WorkerMode::Remote
    }

    async fn liveness(&self) -> Result<(), WorkerError> {
        let probe = self
            .http
            .get(self.url("/"))
            .timeout(self.liveness_timeout)
            .send()
            .await;

        match probe {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => {
                tracing::warn!(status = %response.status(), "Worker liveness probe rejected");
                Err(WorkerError::Unavailable(UNAVAILABLE.to_string()))
            }
            Err(e) => {
                tracing::warn!(error = %e, base_url = %self.base_url, "Worker liveness probe failed");
                Err(WorkerError::Unavailable(UNAVAILABLE.to_string()))
            }
        }
    }

    async fn prepare(
        &self,
        job_id: Uuid,
        reference: &MediaArtifact,
        target: &MediaArtifact,
        credentials: &str,
    ) -> Result<PreparedRun, WorkerError> {
        self.liveness().await?;

        let reference_part = self
            .artifact_part(reference, "Reference image file not found", "reference.jpg")
            .await?;
        let video_part = self
            .artifact_part(target, "Video file not found", "video.mp4")
            .await?;

        let form = Form::new()
            .part("reference_image", reference_part)
            .part("video_file", video_part);

        let response = self
            .send(
                self.http
                    .post(self.url("/process"))
                    .bearer_auth(credentials)
                    .multipart(form),
            )
            .await?;

        if !response.status().is_success() {
            let upstream = ProxiedResponse::read(response).await?;
            tracing::warn!(job_id = %job_id, status = %upstream.status, "Worker rejected submission");
            return Err(WorkerError::Upstream(upstream));
        }

        let accepted: ProcessAccepted = response
            .json()
            .await
            .map_err(|e| WorkerError::InvalidResponse(e.to_string()))?;
        tracing::info!(job_id = %job_id, task_id = %accepted.task_id, "Job forwarded to worker service");

        Ok(PreparedRun::Remote {
            task_id: accepted.task_id,
        })
    }

    async fn launch(&self, _job_id: Uuid, _run: PreparedRun) -> Result<(), WorkerError> {
        // Work started when the service accepted the upload.
        Ok(())
    }

    async fn fetch_status(
        &self,
        job: &MatchJob,
        credentials: &str,
    ) -> Result<Option<WorkerReport>, WorkerError> {
        let response = self
            .send(
                self.http
                    .get(self.url(&format!("/status/{}", job.worker_ref())))
                    .bearer_auth(credentials),
            )
            .await?;

        if !response.status().is_success() {
            return Err(WorkerError::Upstream(ProxiedResponse::read(response).await?));
        }

        let report = response
            .json::<WorkerReport>()
            .await
            .map_err(|e| WorkerError::InvalidResponse(e.to_string()))?;
        Ok(Some(report))
    }

    async fn fetch_frame(
        &self,
        job: &MatchJob,
        frame_id: &str,
        credentials: &str,
    ) -> Result<Option<ProxiedResponse>, WorkerError> {
        let response = self
            .send(
                self.http
                    .get(self.url(&format!("/frame/{}/{}", job.worker_ref(), frame_id)))
                    .bearer_auth(credentials),
            )
            .await?;

        let proxied = ProxiedResponse::read(response).await?;
        if !proxied.is_success() {
            return Err(WorkerError::Upstream(proxied));
        }
        Ok(Some(proxied))
    }
}
