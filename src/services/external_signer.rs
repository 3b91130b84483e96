//! Client for the out-of-process document signer
//!
//! The signer takes a multipart form with the document (`pdf`), the
//! certificate (`certPem`) and the private key (`keyPem`) and answers with the
//! signed document as the raw response body. One request per call; retrying
//! is the caller's decision.

use std::time::Duration;

use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use tracing::{debug, warn};

use crate::types::{Result, SignerError};

/// Longest slice of an error body kept for diagnostics
const MAX_ERROR_BODY: usize = 2048;

/// Anything able to produce a signed document
#[async_trait::async_trait]
pub trait DocumentSigner: Send + Sync {
    async fn sign(&self, document: Bytes, certificate_pem: &str, key_pem: &str) -> Result<Bytes>;
}

#[derive(Debug, Clone)]
pub struct HttpDocumentSignerConfig {
    /// Full URL of the signing endpoint
    pub endpoint: String,
    pub request_timeout: Duration,
}

/// `DocumentSigner` backed by an HTTP multipart endpoint
#[derive(Clone)]
pub struct HttpDocumentSigner {
    endpoint: reqwest::Url,
    http_client: reqwest::Client,
}

impl HttpDocumentSigner {
    pub fn new(config: HttpDocumentSignerConfig) -> Result<Self> {
        let endpoint = reqwest::Url::parse(&config.endpoint)
            .map_err(|e| SignerError::Config(format!("Invalid signer URL: {}", e)))?;

        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent("cosigner/1.0")
            .build()
            .map_err(|e| SignerError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint,
            http_client,
        })
    }
}

#[async_trait::async_trait]
impl DocumentSigner for HttpDocumentSigner {
    async fn sign(&self, document: Bytes, certificate_pem: &str, key_pem: &str) -> Result<Bytes> {
        let document_len = document.len();
        let pdf = Part::stream(document)
            .file_name("document.pdf")
            .mime_str("application/pdf")
            .map_err(|e| SignerError::ExternalSigner(format!("Invalid part: {}", e)))?;

        let form = Form::new()
            .part("pdf", pdf)
            .text("certPem", certificate_pem.to_string())
            .text("keyPem", key_pem.to_string());

        debug!(bytes = document_len, "Sending document to external signer");

        let response = self
            .http_client
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| SignerError::ExternalSigner(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(MAX_ERROR_BODY).collect();
            warn!(status = %status, "External signer rejected document");
            return Err(SignerError::ExternalSigner(format!("{} {}", status, body)));
        }

        response
            .bytes()
            .await
            .map_err(|e| SignerError::ExternalSigner(format!("Failed to read signed body: {}", e)))
    }
}
