//! Worker stand-ins: a media tree with a shell-script worker for local mode
//! and an axum app imitating the recognition service for remote mode.

#![allow(dead_code)]

use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Result body a successful worker writes: two matches.
pub const TWO_MATCHES: &str = r#"{
  "status": "completed",
  "matchCount": 2,
  "matches": [
    {"timestamp": 5.0, "distance": 0.41, "frame": 150, "position": {"x": 10, "y": 20, "width": 64, "height": 64}},
    {"timestamp": 6.0, "distance": 0.38, "frame": 180, "position": {"x": 12, "y": 22, "width": 64, "height": 64}}
  ]
}"#;

/// Scratch layout for a local worker.
pub struct LocalWorkerDir {
    pub dir: tempfile::TempDir,
}

impl LocalWorkerDir {
    /// `script` is a shell body; `$6` is the result path it must write.
    pub fn new(script: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("public/uploads")).unwrap();
        std::fs::write(root.join("public/uploads/face.jpg"), b"\xff\xd8face").unwrap();
        std::fs::write(root.join("public/uploads/clip.mp4"), b"mp4").unwrap();
        std::fs::write(root.join("public/best.pt"), b"weights").unwrap();
        std::fs::write(root.join("worker.sh"), script).unwrap();
        Self { dir }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn env(&self) -> Vec<(&'static str, String)> {
        let p = |rel: &str| self.path(rel).display().to_string();
        vec![
            ("WORKER_MODE", "local".to_string()),
            ("WORKER_EXECUTABLE", "sh".to_string()),
            ("WORKER_SCRIPT", p("worker.sh")),
            ("WORKER_MODEL_PATH", p("public/best.pt")),
            ("MEDIA_ROOT", p("public")),
            ("OUTPUT_DIR", p("results")),
            ("TEMP_ROOT", p("tmp")),
            ("FRAME_WORK_DIR", p("python/temp")),
        ]
    }
}

pub fn writes_result(body: &str) -> String {
    format!("cat > \"$6\" <<'JSON'\n{body}\nJSON\n")
}

/// Canned behaviour of the fake recognition service.
#[derive(Default)]
pub struct FakeWorkerState {
    /// Status bodies served in order; `processing` once exhausted.
    pub statuses: Mutex<VecDeque<(StatusCode, serde_json::Value)>>,
    /// Frame responses keyed by frame id.
    pub frames: Mutex<Vec<(String, StatusCode, &'static str, Vec<u8>)>>,
    /// Multipart field names and the bearer token of each submission.
    pub submissions: Mutex<Vec<(Vec<String>, Option<String>)>>,
    /// Bytes received per multipart field, across all submissions.
    pub uploads: Mutex<Vec<(String, Vec<u8>)>>,
    pub status_calls: Mutex<u32>,
}

impl FakeWorkerState {
    pub fn push_status(&self, status: StatusCode, body: serde_json::Value) {
        self.statuses.lock().unwrap().push_back((status, body));
    }
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({"message": "Face Recognition API is running"}))
}

async fn process(
    State(state): State<Arc<FakeWorkerState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Json<serde_json::Value> {
    let mut fields = Vec::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.unwrap();
        state.uploads.lock().unwrap().push((name.clone(), bytes.to_vec()));
        fields.push(name);
    }
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    state.submissions.lock().unwrap().push((fields, bearer));

    Json(json!({"status": "processing", "task_id": "task-1", "message": "Processing started"}))
}

async fn status(
    State(state): State<Arc<FakeWorkerState>>,
    Path(task_id): Path<String>,
) -> Response {
    *state.status_calls.lock().unwrap() += 1;
    if task_id != "task-1" {
        return (StatusCode::NOT_FOUND, Json(json!({"detail": "Task not found"}))).into_response();
    }
    let next = state.statuses.lock().unwrap().pop_front();
    match next {
        Some((code, body)) => (code, Json(body)).into_response(),
        None => Json(json!({"status": "processing", "task_id": task_id})).into_response(),
    }
}

async fn frame(
    State(state): State<Arc<FakeWorkerState>>,
    Path((_task_id, frame_id)): Path<(String, String)>,
) -> Response {
    let frames = state.frames.lock().unwrap();
    match frames.iter().find(|(id, ..)| *id == frame_id) {
        Some((_, code, content_type, body)) => {
            (*code, [(header::CONTENT_TYPE, *content_type)], body.clone()).into_response()
        }
        None => (StatusCode::NOT_FOUND, Json(json!({"detail": "Frame not found"}))).into_response(),
    }
}

/// Serve the fake recognition service on an ephemeral port.
pub async fn spawn_fake_worker() -> (String, Arc<FakeWorkerState>) {
    let state = Arc::new(FakeWorkerState::default());
    let app = Router::new()
        .route("/", get(root))
        .route("/process", post(process))
        .route("/status/{task_id}", get(status))
        .route("/frame/{task_id}/{frame_id}", get(frame))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), state)
}

/// An address nothing listens on.
pub async fn dead_worker_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

/// A worker that accepts connections and never answers.
pub async fn silent_worker_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://{addr}")
}
