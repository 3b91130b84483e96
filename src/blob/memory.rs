use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::RwLock;

use super::BlobStore;
use crate::types::{Result, SignerError};

/// Map-backed store for tests and local runs
#[derive(Clone, Default)]
pub struct InMemoryBlobStore {
    blobs: Arc<RwLock<HashMap<String, (Bytes, String)>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        self.blobs
            .write()
            .await
            .insert(key.into(), (data.into(), "application/octet-stream".into()));
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.blobs.read().await.contains_key(key)
    }

    pub async fn content_type(&self, key: &str) -> Option<String> {
        self.blobs.read().await.get(key).map(|(_, ct)| ct.clone())
    }
}

#[async_trait::async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn fetch(&self, key: &str) -> Result<Bytes> {
        self.blobs
            .read()
            .await
            .get(key)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| SignerError::NotFound(format!("Blob not found: {}", key)))
    }

    async fn store(&self, key: &str, data: Bytes, content_type: &str) -> Result<()> {
        self.blobs
            .write()
            .await
            .insert(key.to_string(), (data, content_type.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_and_fetch() {
        let store = InMemoryBlobStore::new();
        store
            .store("signed/doc.pdf", Bytes::from_static(b"%PDF-1.7"), "application/pdf")
            .await
            .unwrap();

        assert_eq!(store.fetch("signed/doc.pdf").await.unwrap(), Bytes::from_static(b"%PDF-1.7"));
        assert_eq!(
            store.content_type("signed/doc.pdf").await.as_deref(),
            Some("application/pdf")
        );
        assert!(matches!(
            store.fetch("missing").await,
            Err(SignerError::NotFound(_))
        ));
    }
}
