//! Still-frame lookup for individual matches.
//!
//! A local worker drops frames into one of several scratch directories
//! depending on how it was started and which version wrote them. When none of
//! those directories exist, the frame lives with the remote worker service.

use axum::body::Bytes;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::models::api::PlaceholderFrame;
use crate::models::job::MatchJob;
use crate::services::worker::{ProxiedResponse, WorkerBackend, WorkerError};

/// File names a worker may have used for one match, in lookup order.
const FILENAME_PATTERNS: &[fn(u32, u64) -> String] = &[
    |i, n| format!("match_{i}_frame_{n}.jpg"),
    |i, n| format!("match_{i}frame_{n}.jpg"),
    |i, n| format!("{i}_{n}.jpg"),
];

/// `{matchIndex}_{frameNumber}`, optionally followed by a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameId {
    pub match_index: u32,
    pub frame_number: u64,
}

impl FrameId {
    pub fn parse(raw: &str) -> Option<Self> {
        let stem = raw.split('.').next().unwrap_or(raw);
        let (index, frame) = stem.split_once('_')?;
        if frame.contains('_') {
            return None;
        }
        Some(Self {
            match_index: index.parse().ok()?,
            frame_number: frame.parse().ok()?,
        })
    }

    fn candidates(&self, dir: &Path) -> impl Iterator<Item = PathBuf> + '_ {
        let dir = dir.to_path_buf();
        FILENAME_PATTERNS
            .iter()
            .map(move |pattern| dir.join(pattern(self.match_index, self.frame_number)))
    }
}

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.match_index, self.frame_number)
    }
}

/// Directory conventions a local worker may use, highest priority first.
#[derive(Debug, Clone)]
pub struct FrameLayouts {
    roots: Vec<PathBuf>,
}

impl FrameLayouts {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        let mut unique = Vec::with_capacity(roots.len());
        for root in roots {
            if !unique.contains(&root) {
                unique.push(root);
            }
        }
        Self { roots: unique }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let temp_root = config.temp_root();
        let normalized = PathBuf::from(temp_root.to_string_lossy().replace('\\', "/"));
        Self::new(vec![
            temp_root.join(&config.frame_dir_name),
            config.frame_work_dir.clone(),
            normalized.join(&config.frame_dir_name),
        ])
    }

    /// Frame directories for a worker task, in lookup order.
    pub fn directories(&self, key: &str) -> Vec<PathBuf> {
        self.roots.iter().map(|root| root.join(key)).collect()
    }
}

#[derive(Debug)]
pub enum ResolvedFrame {
    Image { bytes: Bytes, content_type: &'static str },
    Placeholder(PlaceholderFrame),
    Proxied(ProxiedResponse),
}

impl IntoResponse for ResolvedFrame {
    fn into_response(self) -> Response {
        match self {
            ResolvedFrame::Image { bytes, content_type } => {
                (StatusCode::OK, [(CONTENT_TYPE, content_type)], bytes).into_response()
            }
            ResolvedFrame::Placeholder(body) => (StatusCode::OK, Json(body)).into_response(),
            ResolvedFrame::Proxied(proxied) => proxied.into_response(),
        }
    }
}

pub struct FrameResolver {
    layouts: FrameLayouts,
    backend: Arc<dyn WorkerBackend>,
}

impl FrameResolver {
    pub fn new(layouts: FrameLayouts, backend: Arc<dyn WorkerBackend>) -> Self {
        Self { layouts, backend }
    }

    /// Locate the frame for `raw_frame_id` of `job`.
    ///
    /// A directory without the requested file yields a placeholder rather
    /// than an error. Remote error statuses come back as
    /// [`WorkerError::Upstream`].
    pub async fn resolve(
        &self,
        job: &MatchJob,
        frame: FrameId,
        raw_frame_id: &str,
        credentials: &str,
    ) -> Result<ResolvedFrame, WorkerError> {
        let key = job.worker_ref();

        if let Some(dir) = first_existing(self.layouts.directories(&key)).await {
            tracing::debug!(job_id = %job.id, dir = %dir.display(), "Found frame directory");
            for path in frame.candidates(&dir) {
                if let Ok(bytes) = tokio::fs::read(&path).await {
                    return Ok(ResolvedFrame::Image {
                        bytes: Bytes::from(bytes),
                        content_type: content_type_for(&path),
                    });
                }
            }
            return Ok(self.placeholder(job, frame, "no file matched"));
        }

        match self.backend.fetch_frame(job, raw_frame_id, credentials).await? {
            Some(proxied) => Ok(ResolvedFrame::Proxied(proxied)),
            None => Ok(self.placeholder(job, frame, "no frame directory")),
        }
    }

    fn placeholder(&self, job: &MatchJob, frame: FrameId, reason: &str) -> ResolvedFrame {
        metrics::counter!("frame_placeholders_total").increment(1);
        tracing::info!(job_id = %job.id, frame_id = %frame, reason, "Serving frame placeholder");
        ResolvedFrame::Placeholder(PlaceholderFrame::new(frame.to_string()))
    }
}

async fn first_existing(dirs: Vec<PathBuf>) -> Option<PathBuf> {
    for dir in dirs {
        if tokio::fs::metadata(&dir).await.is_ok_and(|m| m.is_dir()) {
            return Some(dir);
        }
    }
    None
}

fn content_type_for(path: &Path) -> &'static str {
    image::ImageFormat::from_path(path)
        .map(|format| format.to_mime_type())
        .unwrap_or("image/jpeg")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerMode;
    use crate::models::artifact::MediaArtifact;
    use crate::models::job::{JobStatus, MatchJob};
    use crate::services::worker::{PreparedRun, WorkerReport};
    use async_trait::async_trait;
    use chrono::Utc;
    use uuid::Uuid;

    /// Serves a fixed body for every frame, or nothing.
    struct StubWorker(Option<ProxiedResponse>);

    #[async_trait]
    impl WorkerBackend for StubWorker {
        fn mode(&self) -> WorkerMode {
            WorkerMode::Remote
        }
        async fn liveness(&self) -> Result<(), WorkerError> {
            Ok(())
        }
        async fn prepare(
            &self,
            _: Uuid,
            _: &MediaArtifact,
            _: &MediaArtifact,
            _: &str,
        ) -> Result<PreparedRun, WorkerError> {
            unreachable!()
        }
        async fn launch(&self, _: Uuid, _: PreparedRun) -> Result<(), WorkerError> {
            unreachable!()
        }
        async fn fetch_status(&self, _: &MatchJob, _: &str) -> Result<Option<WorkerReport>, WorkerError> {
            Ok(None)
        }
        async fn fetch_frame(
            &self,
            _: &MatchJob,
            _: &str,
            _: &str,
        ) -> Result<Option<ProxiedResponse>, WorkerError> {
            match &self.0 {
                Some(p) if !p.is_success() => Err(WorkerError::Upstream(p.clone())),
                other => Ok(other.clone()),
            }
        }
    }

    fn job() -> MatchJob {
        MatchJob {
            id: Uuid::new_v4(),
            owner_id: "u1".into(),
            reference_artifact_id: "img1".into(),
            target_artifact_id: "vid1".into(),
            status: JobStatus::Completed,
            match_count: 0,
            matches: Vec::new(),
            error: None,
            worker_task_id: None,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    fn resolver(roots: Vec<PathBuf>, remote: Option<ProxiedResponse>) -> FrameResolver {
        FrameResolver::new(FrameLayouts::new(roots), Arc::new(StubWorker(remote)))
    }

    #[test]
    fn test_frame_id_parsing() {
        assert_eq!(
            FrameId::parse("2_450.jpg"),
            Some(FrameId { match_index: 2, frame_number: 450 })
        );
        assert_eq!(FrameId::parse("0_15").map(|f| f.to_string()), Some("0_15".into()));
        assert!(FrameId::parse("450.jpg").is_none());
        assert!(FrameId::parse("1_2_3").is_none());
        assert!(FrameId::parse("a_b.jpg").is_none());
    }

    #[tokio::test]
    async fn test_older_filename_pattern_is_found() {
        let tmp = tempfile::tempdir().unwrap();
        let job = job();
        let dir = tmp.path().join("second").join(job.id.to_string());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("match_1frame_300.jpg"), b"\xff\xd8jpeg").unwrap();

        let resolver = resolver(
            vec![tmp.path().join("first"), tmp.path().join("second")],
            None,
        );
        let frame = FrameId::parse("1_300.jpg").unwrap();
        match resolver.resolve(&job, frame, "1_300.jpg", "t").await.unwrap() {
            ResolvedFrame::Image { bytes, content_type } => {
                assert_eq!(content_type, "image/jpeg");
                assert_eq!(&bytes[..], b"\xff\xd8jpeg");
            }
            other => panic!("expected image, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_existing_dir_without_file_gives_placeholder() {
        let tmp = tempfile::tempdir().unwrap();
        let job = job();
        std::fs::create_dir_all(tmp.path().join(job.id.to_string())).unwrap();

        let remote = ProxiedResponse {
            status: StatusCode::OK,
            content_type: Some("image/jpeg".into()),
            body: Bytes::from_static(b"remote"),
        };
        let resolver = resolver(vec![tmp.path().to_path_buf()], Some(remote));
        let frame = FrameId::parse("0_150").unwrap();

        match resolver.resolve(&job, frame, "0_150", "t").await.unwrap() {
            ResolvedFrame::Placeholder(body) => {
                assert!(body.placeholder);
                assert_eq!(body.frame_id, "0_150");
            }
            other => panic!("expected placeholder, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_local_dir_proxies_remote() {
        let tmp = tempfile::tempdir().unwrap();
        let remote = ProxiedResponse {
            status: StatusCode::OK,
            content_type: Some("image/png".into()),
            body: Bytes::from_static(b"png"),
        };
        let resolver = resolver(vec![tmp.path().join("absent")], Some(remote));
        let frame = FrameId::parse("0_150.jpg").unwrap();

        match resolver.resolve(&job(), frame, "0_150.jpg", "t").await.unwrap() {
            ResolvedFrame::Proxied(p) => assert_eq!(p.content_type.as_deref(), Some("image/png")),
            other => panic!("expected proxied frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_remote_error_status_is_not_swallowed() {
        let tmp = tempfile::tempdir().unwrap();
        let remote = ProxiedResponse {
            status: StatusCode::NOT_FOUND,
            content_type: Some("application/json".into()),
            body: Bytes::from_static(br#"{"detail":"Frame not found"}"#),
        };
        let resolver = resolver(vec![tmp.path().join("absent")], Some(remote));
        let frame = FrameId::parse("0_1").unwrap();

        let err = resolver.resolve(&job(), frame, "0_1", "t").await.unwrap_err();
        assert!(matches!(err, WorkerError::Upstream(p) if p.status == StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn test_no_dir_and_no_remote_gives_placeholder() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = resolver(vec![tmp.path().join("absent")], None);
        let frame = FrameId::parse("3_9").unwrap();
        assert!(matches!(
            resolver.resolve(&job(), frame, "3_9", "t").await.unwrap(),
            ResolvedFrame::Placeholder(_)
        ));
    }

    #[test]
    fn test_duplicate_roots_are_collapsed() {
        let layouts = FrameLayouts::new(vec![
            PathBuf::from("/tmp/face_recognition_uploads"),
            PathBuf::from("python/temp"),
            PathBuf::from("/tmp/face_recognition_uploads"),
        ]);
        assert_eq!(layouts.directories("t1").len(), 2);
    }
}
