use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use strum::Display;

/// How the recognition worker is deployed.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WorkerMode {
    /// Spawn the worker as a child process per job.
    Local,
    /// Forward jobs to a long-lived worker service over HTTP.
    Remote,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string. Jobs are kept in memory when unset.
    #[serde(default)]
    pub database_url: Option<String>,

    /// HMAC secret for session tokens
    pub jwt_secret: String,

    #[serde(default = "default_worker_mode")]
    pub worker_mode: WorkerMode,

    /// Base URL of the remote worker service
    #[serde(default = "default_worker_base_url")]
    pub worker_base_url: String,

    /// Interpreter or binary that runs the local worker
    #[serde(default = "default_worker_executable")]
    pub worker_executable: PathBuf,

    /// Script passed as the first argument to the executable, if any
    #[serde(default = "default_worker_script")]
    pub worker_script: Option<PathBuf>,

    #[serde(default = "default_worker_model_path")]
    pub worker_model_path: PathBuf,

    /// Root that relative artifact locators resolve against
    #[serde(default = "default_media_root")]
    pub media_root: PathBuf,

    /// Where local workers write their `<job id>.json` result
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Per-job frame directory name under the temp root
    #[serde(default = "default_frame_dir_name")]
    pub frame_dir_name: String,

    /// Working-directory frame root used by directly launched workers
    #[serde(default = "default_frame_work_dir")]
    pub frame_work_dir: PathBuf,

    /// Temp root the worker writes frames under (platform temp dir by default)
    #[serde(default)]
    pub temp_root: Option<PathBuf>,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_poll_max_attempts")]
    pub poll_max_attempts: u32,

    #[serde(default = "default_poll_max_transport_failures")]
    pub poll_max_transport_failures: u32,

    #[serde(default = "default_liveness_timeout_ms")]
    pub liveness_timeout_ms: u64,

    /// Upper bound on any other request to the remote worker
    #[serde(default = "default_worker_request_timeout_ms")]
    pub worker_request_timeout_ms: u64,

    /// Age after which an unfinished job no longer blocks identical submissions
    #[serde(default = "default_in_flight_max_age_secs")]
    pub in_flight_max_age_secs: u64,

    /// Upper bound on reconciling one worker exit
    #[serde(default = "default_completion_timeout_secs")]
    pub completion_timeout_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_worker_mode() -> WorkerMode {
    WorkerMode::Local
}

fn default_worker_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_worker_executable() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("python/venv/Scripts/python.exe")
    } else {
        PathBuf::from("python/venv/bin/python")
    }
}

fn default_worker_script() -> Option<PathBuf> {
    Some(PathBuf::from("python/face_recognition.py"))
}

fn default_worker_model_path() -> PathBuf {
    PathBuf::from("public/best.pt")
}

fn default_media_root() -> PathBuf {
    PathBuf::from("public")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("public/face-recognition-results")
}

fn default_frame_dir_name() -> String {
    "face_recognition_uploads".to_string()
}

fn default_frame_work_dir() -> PathBuf {
    PathBuf::from("python/temp")
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_poll_max_attempts() -> u32 {
    60
}

fn default_poll_max_transport_failures() -> u32 {
    3
}

fn default_liveness_timeout_ms() -> u64 {
    3000
}

fn default_worker_request_timeout_ms() -> u64 {
    30_000
}

fn default_in_flight_max_age_secs() -> u64 {
    1800
}

fn default_completion_timeout_secs() -> u64 {
    30
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn temp_root(&self) -> PathBuf {
        self.temp_root.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn worker_request_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_request_timeout_ms)
    }

    pub fn in_flight_max_age(&self) -> Duration {
        Duration::from_secs(self.in_flight_max_age_secs)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_secs)
    }
}
