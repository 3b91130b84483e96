//! Blob store client
//!
//! Documents and signed artifacts live in an external keyed object store.
//! The service only ever needs whole-object fetch and store.

mod http;
mod memory;

use bytes::Bytes;

use crate::types::Result;

pub use http::{HttpBlobStore, HttpBlobStoreConfig};
pub use memory::InMemoryBlobStore;

/// Content type of signed artifacts
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Keyed object storage
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    /// Read a whole object. A missing key is `SignerError::NotFound`.
    async fn fetch(&self, key: &str) -> Result<Bytes>;

    /// Write a whole object, replacing any existing one
    async fn store(&self, key: &str, data: Bytes, content_type: &str) -> Result<()>;
}
