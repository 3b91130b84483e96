//! `GET /download/<token>` and `GET /view/<token>`
//!
//! Serves the original upload, or with `?signed=1` the signed copy once the
//! session is signed. `/view` sends the same bytes inline.

use std::sync::Arc;

use hyper::header::{self, HeaderValue};
use hyper::{Response, StatusCode};
use tracing::error;

use super::{error_message, full_body, BoxBody};
use crate::blob::PDF_CONTENT_TYPE;
use crate::server::AppState;
use crate::types::SignerError;

/// Whether the query string asks for the signed artifact
pub fn wants_signed(query: Option<&str>) -> bool {
    query
        .unwrap_or_default()
        .split('&')
        .any(|pair| matches!(pair, "signed=1" | "signed=true"))
}

fn file_name(blob_key: &str, signed: bool) -> String {
    let base: String = blob_key
        .rsplit('/')
        .next()
        .unwrap_or("document.pdf")
        .chars()
        .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
        .collect();
    let base = if base.is_empty() { "document.pdf".to_string() } else { base };
    if signed {
        format!("signed-{}", base)
    } else {
        base
    }
}

pub async fn handle_download(
    state: Arc<AppState>,
    token: &str,
    query: Option<&str>,
    inline: bool,
) -> Response<BoxBody> {
    if token.is_empty() || token.contains('/') {
        return error_message(StatusCode::BAD_REQUEST, "Token required");
    }

    let session = match state.orchestrator.session(token).await {
        Ok(Some(session)) => session,
        Ok(None) => return error_message(StatusCode::NOT_FOUND, "Session not found"),
        Err(e) => return super::error_response(&e),
    };

    let signed = wants_signed(query);
    let key = if signed {
        match session.artifacts.as_ref() {
            Some(artifacts) => artifacts.signed_blob_key.clone(),
            None => return error_message(StatusCode::NOT_FOUND, "Signed document not available"),
        }
    } else {
        session.blob_key.clone()
    };

    let data = match state.blob_store.fetch(&key).await {
        Ok(data) => data,
        Err(SignerError::NotFound(_)) => {
            return error_message(StatusCode::NOT_FOUND, "Document not found")
        }
        Err(e) => {
            error!(token = %token, error = %e, "Failed to load document for download");
            return error_message(StatusCode::INTERNAL_SERVER_ERROR, "File storage error");
        }
    };

    let disposition = format!(
        "{}; filename=\"{}\"",
        if inline { "inline" } else { "attachment" },
        file_name(&session.blob_key, signed)
    );

    let mut response = Response::new(full_body(data));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(PDF_CONTENT_TYPE));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}
