use std::sync::Arc;

use crate::auth::SessionKeys;
use crate::config::{AppConfig, WorkerMode};
use crate::services::completion::{CompletionHandler, JobFinalizer};
use crate::services::frames::{FrameLayouts, FrameResolver};
use crate::services::inflight::InFlightRegistry;
use crate::services::poller::PollPolicy;
use crate::services::status::StatusService;
use crate::services::submission::SubmissionService;
use crate::services::worker::{
    LocalProcessBackend, LocalWorkerSettings, RemoteServiceBackend, WorkerBackend, WorkerError,
};
use crate::store::{ArtifactCatalog, JobStore};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub backend: Arc<dyn WorkerBackend>,
    pub sessions: Arc<SessionKeys>,
    pub submissions: Arc<SubmissionService>,
    pub status: Arc<StatusService>,
    pub frames: Arc<FrameResolver>,
}

impl AppState {
    /// Wire services around the given stores. The worker backend is picked
    /// from `config.worker_mode`.
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn JobStore>,
        catalog: Arc<dyn ArtifactCatalog>,
    ) -> Result<Self, WorkerError> {
        let in_flight = Arc::new(InFlightRegistry::new(config.in_flight_max_age()));
        let finalizer = Arc::new(JobFinalizer::new(store.clone(), in_flight.clone()));

        let backend: Arc<dyn WorkerBackend> = match config.worker_mode {
            WorkerMode::Local => {
                let completion = Arc::new(CompletionHandler::new(
                    finalizer.clone(),
                    config.completion_timeout(),
                ));
                Arc::new(LocalProcessBackend::new(
                    LocalWorkerSettings::from_config(config),
                    completion,
                ))
            }
            WorkerMode::Remote => Arc::new(RemoteServiceBackend::from_config(config)?),
        };

        Ok(Self {
            submissions: Arc::new(SubmissionService::new(
                store.clone(),
                catalog,
                backend.clone(),
                in_flight,
                finalizer.clone(),
            )),
            status: Arc::new(StatusService::new(
                store.clone(),
                backend.clone(),
                finalizer,
                PollPolicy::from_config(config),
            )),
            frames: Arc::new(FrameResolver::new(
                FrameLayouts::from_config(config),
                backend.clone(),
            )),
            sessions: Arc::new(SessionKeys::new(&config.jwt_secret)),
            store,
            backend,
        })
    }
}
