//! Face-match job orchestration service.
//!
//! Accepts jobs comparing a reference image against a video, dispatches them
//! to a recognition worker (a local child process or a remote HTTP service),
//! tracks their lifecycle and serves the still frames of each match.

pub mod app_state;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;
