//! HTTP route handlers

pub mod download;
pub mod health;
pub mod sign;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{self, HeaderValue};
use hyper::{Response, StatusCode};
use serde::Serialize;
use serde_json::json;
use tracing::error;

use crate::types::SignerError;

pub use download::handle_download;
pub use health::health_response;
pub use sign::{handle_sign, handle_sign_request};

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed()
}

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<BoxBody> {
    let json = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());

    let mut response = Response::new(full_body(json));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

/// `{"error": <public message>}` with the error's status
pub fn error_response(err: &SignerError) -> Response<BoxBody> {
    let status = err.status_code();
    if status.is_server_error() {
        error!(error = %err, "Request failed");
    }
    json_response(status, &json!({ "error": err.public_message() }))
}

pub fn error_message(status: StatusCode, message: &str) -> Response<BoxBody> {
    json_response(status, &json!({ "error": message }))
}

pub fn method_not_allowed() -> Response<BoxBody> {
    error_message(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}

pub fn not_found() -> Response<BoxBody> {
    error_message(StatusCode::NOT_FOUND, "Not found")
}

#[cfg(test)]
pub(crate) async fn body_json(response: Response<BoxBody>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
