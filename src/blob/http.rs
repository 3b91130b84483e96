use std::time::Duration;

use bytes::Bytes;
use reqwest::{header, StatusCode, Url};
use tracing::debug;

use super::BlobStore;
use crate::types::{Result, SignerError};

#[derive(Debug, Clone)]
pub struct HttpBlobStoreConfig {
    /// Base URL; objects live at `{base_url}/{key}`
    pub base_url: String,
    /// Bearer token sent with every request
    pub token: Option<String>,
    pub request_timeout: Duration,
}

/// Blob store spoken to over plain HTTP GET/PUT
#[derive(Clone)]
pub struct HttpBlobStore {
    base_url: Url,
    token: Option<String>,
    http_client: reqwest::Client,
}

impl HttpBlobStore {
    pub fn new(config: HttpBlobStoreConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| SignerError::Config(format!("Invalid blob store URL: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(SignerError::Config("Blob store URL cannot be a base".into()));
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent("cosigner/1.0")
            .build()
            .map_err(|e| SignerError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            token: config.token.filter(|t| !t.is_empty()),
            http_client,
        })
    }

    /// `{base}/{key}` with every key segment percent-encoded
    fn object_url(&self, key: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SignerError::Config("Blob store URL cannot be a base".into()))?
            .pop_if_empty()
            .extend(key.split('/'));
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait::async_trait]
impl BlobStore for HttpBlobStore {
    async fn fetch(&self, key: &str) -> Result<Bytes> {
        let url = self.object_url(key)?;
        debug!(key = %key, "Fetching blob");

        let response = self
            .authorize(self.http_client.get(url))
            .send()
            .await
            .map_err(|e| SignerError::Blob(format!("Fetch {} failed: {}", key, e)))?;

        match response.status() {
            status if status.is_success() => response
                .bytes()
                .await
                .map_err(|e| SignerError::Blob(format!("Fetch {} body failed: {}", key, e))),
            StatusCode::NOT_FOUND => Err(SignerError::NotFound(format!("Blob not found: {}", key))),
            status => Err(SignerError::Blob(format!("Fetch {} returned HTTP {}", key, status))),
        }
    }

    async fn store(&self, key: &str, data: Bytes, content_type: &str) -> Result<()> {
        let url = self.object_url(key)?;
        debug!(key = %key, bytes = data.len(), "Storing blob");

        let response = self
            .authorize(self.http_client.put(url))
            .header(header::CONTENT_TYPE, content_type)
            .body(data)
            .send()
            .await
            .map_err(|e| SignerError::Blob(format!("Store {} failed: {}", key, e)))?;

        if !response.status().is_success() {
            return Err(SignerError::Blob(format!(
                "Store {} returned HTTP {}",
                key,
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_bytes, header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store_for(server: &MockServer, token: Option<&str>) -> HttpBlobStore {
        HttpBlobStore::new(HttpBlobStoreConfig {
            base_url: format!("{}/bucket", server.uri()),
            token: token.map(str::to_string),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bucket/doc.pdf"))
            .and(header_eq("authorization", "Bearer s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.7".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let data = store_for(&server, Some("s3cret")).fetch("doc.pdf").await.unwrap();
        assert_eq!(data, Bytes::from_static(b"%PDF-1.7"));
    }

    #[tokio::test]
    async fn test_fetch_missing_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = store_for(&server, None).fetch("gone.pdf").await.unwrap_err();
        assert!(matches!(err, SignerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_store_nested_key() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/bucket/signed/doc.pdf"))
            .and(header_eq("content-type", "application/pdf"))
            .and(body_bytes(b"signed".to_vec()))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        store_for(&server, None)
            .store("signed/doc.pdf", Bytes::from_static(b"signed"), "application/pdf")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_store_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = store_for(&server, None)
            .store("doc.pdf", Bytes::from_static(b"x"), "application/pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, SignerError::Blob(_)));
    }

    #[test]
    fn test_invalid_base_url() {
        let err = HttpBlobStore::new(HttpBlobStoreConfig {
            base_url: "not a url".into(),
            token: None,
            request_timeout: Duration::from_secs(1),
        });
        assert!(matches!(err, Err(SignerError::Config(_))));
    }
}
