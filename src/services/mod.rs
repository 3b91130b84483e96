//! Clients for services outside this process

pub mod external_signer;

pub use external_signer::{DocumentSigner, HttpDocumentSigner, HttpDocumentSignerConfig};
