//! Test helper utilities for driving the router in-process.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

use vidmatch::app_state::AppState;
use vidmatch::auth::SessionKeys;
use vidmatch::config::AppConfig;
use vidmatch::models::artifact::{MediaArtifact, MediaKind};
use vidmatch::routes;
use vidmatch::store::{JobStore, MemoryArtifactCatalog, MemoryJobStore};

pub const JWT_SECRET: &str = "integration-secret";

/// A router over in-memory stores plus handles to inspect them.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryJobStore>,
    pub catalog: Arc<MemoryArtifactCatalog>,
}

/// Configuration from `vars` on top of the test secret and a fast poller.
pub fn config(vars: &[(&str, String)]) -> AppConfig {
    let mut all = vec![
        ("JWT_SECRET".to_string(), JWT_SECRET.to_string()),
        ("POLL_INTERVAL_SECS".to_string(), "0".to_string()),
        ("POLL_MAX_ATTEMPTS".to_string(), "5".to_string()),
        ("LIVENESS_TIMEOUT_MS".to_string(), "500".to_string()),
    ];
    all.extend(vars.iter().map(|(k, v)| (k.to_string(), v.clone())));
    envy::from_iter(all).expect("test config")
}

pub async fn build_app(config: &AppConfig) -> TestApp {
    let store = Arc::new(MemoryJobStore::new());
    let catalog = Arc::new(MemoryArtifactCatalog::new());
    let state = AppState::new(config, store.clone(), catalog.clone()).expect("app state");
    let prometheus = PrometheusBuilder::new().build_recorder().handle();

    TestApp {
        router: routes::router(state, Arc::new(prometheus)),
        store,
        catalog,
    }
}

pub fn token(user_id: &str, role: &str) -> String {
    SessionKeys::new(JWT_SECRET)
        .issue(user_id, role, chrono::Duration::hours(1))
        .expect("issue token")
}

impl TestApp {
    pub async fn add_artifact(&self, id: &str, owner: &str, kind: MediaKind, locator: &str) {
        self.catalog
            .insert(MediaArtifact {
                id: id.to_string(),
                owner_id: owner.to_string(),
                kind,
                locator: locator.to_string(),
                title: None,
            })
            .await;
    }

    /// Send a request as `user`, returning status, content type and body.
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        user: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, Option<String>, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token(user, "USER")));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, content_type, bytes.to_vec())
    }

    pub async fn json(
        &self,
        method: Method,
        uri: &str,
        user: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let (status, _, bytes) = self.send(method, uri, user, body).await;
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, value)
    }

    pub async fn submit(&self, user: &str, reference: &str, target: &str) -> (StatusCode, serde_json::Value) {
        self.json(
            Method::POST,
            "/jobs",
            Some(user),
            Some(serde_json::json!({
                "referenceArtifactId": reference,
                "targetArtifactId": target,
            })),
        )
        .await
    }

    pub async fn job(&self, id: Uuid) -> vidmatch::models::job::MatchJob {
        self.store.get(id).await.unwrap()
    }

    /// Poll the store until the job leaves `processing`.
    pub async fn wait_terminal(&self, id: Uuid) -> vidmatch::models::job::MatchJob {
        for _ in 0..200 {
            let job = self.store.get(id).await.unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job {id} never reached a terminal state");
    }
}

pub fn job_id(body: &serde_json::Value) -> Uuid {
    body["jobId"].as_str().unwrap().parse().unwrap()
}

pub fn write_file(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, bytes).unwrap();
}
