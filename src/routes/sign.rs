//! `POST /api/sign`

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Limited};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde_json::json;
use tracing::error;

use super::{error_message, error_response, json_response, method_not_allowed, BoxBody};
use crate::server::AppState;
use crate::session::SignRequest;

/// Largest accepted request body
const MAX_BODY_BYTES: usize = 16 * 1024;

pub async fn handle_sign_request(req: Request<Incoming>, state: Arc<AppState>) -> Response<BoxBody> {
    if req.method() != Method::POST {
        return method_not_allowed();
    }

    let body = match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => return error_message(StatusCode::BAD_REQUEST, "Invalid request"),
    };

    handle_sign(state, body).await
}

/// Run a sign request from its raw JSON body.
///
/// The orchestrator runs on its own task, so a client that disconnects
/// mid-request cannot cancel the pipeline between its stages.
pub async fn handle_sign(state: Arc<AppState>, body: Bytes) -> Response<BoxBody> {
    let request: SignRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(_) => return error_message(StatusCode::BAD_REQUEST, "Invalid request"),
    };

    let orchestrator = Arc::clone(&state.orchestrator);
    let task = tokio::spawn(async move { orchestrator.sign(request).await });

    match task.await {
        Ok(Ok(outcome)) => json_response(
            StatusCode::OK,
            &json!({ "status": "success", "signed_url": outcome.signed_url }),
        ),
        Ok(Err(e)) => error_response(&e),
        Err(e) => {
            error!(error = %e, "Signing task aborted");
            error_message(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}
