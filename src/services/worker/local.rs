use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tokio::process::{ChildStderr, Command};
use uuid::Uuid;

use super::{PreparedRun, ProxiedResponse, WorkerBackend, WorkerError, WorkerReport};
use crate::config::{AppConfig, WorkerMode};
use crate::models::artifact::MediaArtifact;
use crate::models::job::MatchJob;
use crate::services::completion::{CompletionHandler, WorkerExit};

/// Bytes of worker stderr kept for the exit log line.
const STDERR_TAIL_BYTES: usize = 2048;

/// Filesystem locations the local worker needs.
#[derive(Debug, Clone)]
pub struct LocalWorkerSettings {
    pub executable: PathBuf,
    pub script: Option<PathBuf>,
    pub model_path: PathBuf,
    pub media_root: PathBuf,
    pub output_dir: PathBuf,
}

impl LocalWorkerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            executable: config.worker_executable.clone(),
            script: config
                .worker_script
                .clone()
                .filter(|s| !s.as_os_str().is_empty()),
            model_path: config.worker_model_path.clone(),
            media_root: config.media_root.clone(),
            output_dir: config.output_dir.clone(),
        }
    }
}

/// Resolved arguments for one worker invocation.
#[derive(Debug, Clone)]
pub struct LocalRun {
    pub reference: PathBuf,
    pub video: PathBuf,
    pub output: PathBuf,
    pub model: PathBuf,
}

/// Runs the recognition worker as a child process per job.
///
/// The child is detached from the request: [`launch`](WorkerBackend::launch)
/// returns as soon as the process is spawned and a background task hands the
/// exit to the [`CompletionHandler`].
pub struct LocalProcessBackend {
    settings: LocalWorkerSettings,
    completion: Arc<CompletionHandler>,
}

impl LocalProcessBackend {
    pub fn new(settings: LocalWorkerSettings, completion: Arc<CompletionHandler>) -> Self {
        Self {
            settings,
            completion,
        }
    }

    pub fn result_path(&self, job_id: Uuid) -> PathBuf {
        self.settings.output_dir.join(format!("{job_id}.json"))
    }

    fn artifact_path(&self, artifact: &MediaArtifact, label: &str) -> Result<PathBuf, WorkerError> {
        artifact
            .locator()
            .resolve_path(&self.settings.media_root)
            .ok_or_else(|| WorkerError::ResourceMissing(format!("{label} is not stored locally")))
    }

    fn command(&self, run: &LocalRun) -> Command {
        let mut cmd = Command::new(&self.settings.executable);
        if let Some(script) = &self.settings.script {
            cmd.arg(script);
        }
        cmd.arg("--reference")
            .arg(&run.reference)
            .arg("--video")
            .arg(&run.video)
            .arg("--output")
            .arg(&run.output)
            .arg("--model")
            .arg(&run.model)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        cmd
    }

    /// Executable, script and model must all be present.
    async fn check_installation(&self) -> Result<(), WorkerError> {
        // Bare program names are looked up on PATH at spawn time.
        if self.settings.executable.components().count() > 1 {
            require_file(&self.settings.executable, "Worker executable not found").await?;
        }
        if let Some(script) = &self.settings.script {
            require_file(script, "Worker script not found").await?;
        }
        require_file(&self.settings.model_path, "Model file not found").await
    }
}

async fn require_file(path: &Path, missing: &str) -> Result<(), WorkerError> {
    match tokio::fs::try_exists(path).await {
        Ok(true) => Ok(()),
        _ => Err(WorkerError::ResourceMissing(missing.to_string())),
    }
}

async fn read_tail(mut stderr: ChildStderr) -> Option<String> {
    let mut buf = Vec::new();
    stderr.read_to_end(&mut buf).await.ok()?;
    let start = buf.len().saturating_sub(STDERR_TAIL_BYTES);
    let tail = String::from_utf8_lossy(&buf[start..]).trim().to_string();
    (!tail.is_empty()).then_some(tail)
}

#[async_trait]
impl WorkerBackend for LocalProcessBackend {
    fn mode(&self) -> WorkerMode {
        WorkerMode::Local
    }

    async fn liveness(&self) -> Result<(), WorkerError> {
        self.check_installation()
            .await
            .map_err(|e| WorkerError::Unavailable(e.to_string()))
    }

    async fn prepare(
        &self,
        job_id: Uuid,
        reference: &MediaArtifact,
        target: &MediaArtifact,
        _credentials: &str,
    ) -> Result<PreparedRun, WorkerError> {
        let reference = self.artifact_path(reference, "Reference image")?;
        let video = self.artifact_path(target, "Video")?;

        require_file(&reference, "Reference image file not found").await?;
        require_file(&video, "Video file not found").await?;
        self.check_installation().await?;

        tokio::fs::create_dir_all(&self.settings.output_dir)
            .await
            .map_err(|e| WorkerError::ResourceMissing(format!("Output directory unavailable: {e}")))?;

        Ok(PreparedRun::Local(LocalRun {
            reference,
            video,
            output: self.result_path(job_id),
            model: self.settings.model_path.clone(),
        }))
    }

    async fn launch(&self, job_id: Uuid, run: PreparedRun) -> Result<(), WorkerError> {
        let PreparedRun::Local(run) = run else {
            return Err(WorkerError::InvalidResponse(
                "remote run handed to the local worker".into(),
            ));
        };

        let mut child = self.command(&run).spawn().map_err(WorkerError::Spawn)?;
        tracing::info!(job_id = %job_id, pid = child.id(), "Worker process spawned");

        let completion = Arc::clone(&self.completion);
        let stderr = child.stderr.take();
        tokio::spawn(async move {
            let started = Instant::now();
            let stderr_tail = tokio::spawn(async move {
                match stderr {
                    Some(stderr) => read_tail(stderr).await,
                    None => None,
                }
            });

            let exit_code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Failed to wait for worker process");
                    None
                }
            };
            let elapsed = started.elapsed();
            metrics::histogram!("worker_run_seconds").record(elapsed.as_secs_f64());
            tracing::info!(
                job_id = %job_id,
                exit_code = ?exit_code,
                elapsed_ms = elapsed.as_millis() as u64,
                "Worker process exited"
            );

            completion
                .handle(WorkerExit {
                    job_id,
                    exit_code,
                    result_path: run.output,
                    stderr_tail: stderr_tail.await.ok().flatten(),
                })
                .await;
        });

        Ok(())
    }

    async fn fetch_status(
        &self,
        _job: &MatchJob,
        _credentials: &str,
    ) -> Result<Option<WorkerReport>, WorkerError> {
        Ok(None)
    }

    async fn fetch_frame(
        &self,
        _job: &MatchJob,
        _frame_id: &str,
        _credentials: &str,
    ) -> Result<Option<ProxiedResponse>, WorkerError> {
        Ok(None)
    }
}
