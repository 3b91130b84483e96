//! Liveness endpoint

use std::sync::Arc;

use hyper::{Response, StatusCode};
use serde::Serialize;

use super::{json_response, BoxBody};
use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Crate version plus build commit
    pub version: String,
    pub node_id: String,
    pub uptime: u64,
    pub timestamp: String,
}

pub fn health_response(state: Arc<AppState>) -> Response<BoxBody> {
    let body = HealthResponse {
        status: "ok",
        version: format!(
            "{} ({}, built {})",
            env!("CARGO_PKG_VERSION"),
            env!("GIT_COMMIT_SHORT"),
            env!("BUILD_TIMESTAMP")
        ),
        node_id: state.node_id.to_string(),
        uptime: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    json_response(StatusCode::OK, &body)
}
