//! Cosigner - OTP-gated document co-signing
//!
//! A delivered upload task becomes a signing session guarded by a one-time
//! passcode. A correct passcode provisions a fresh RSA key pair and a
//! self-signed certificate, hands both to an external signer with the
//! document, and records the result with the private key sealed under the
//! process master key.
//!
//! ## Components
//!
//! - **crypto**: passcodes, certificates, envelope encryption
//! - **session**: session model and the repository boundary
//! - **db**: MongoDB session repository
//! - **issuer**: JetStream task consumption and OTP issuance
//! - **signing**: the verification state machine and signing pipeline
//! - **blob** / **services**: blob store and external signer clients
//! - **server** / **routes**: the HTTP surface

pub mod blob;
pub mod config;
pub mod crypto;
pub mod db;
pub mod issuer;
pub mod nats;
pub mod routes;
pub mod server;
pub mod services;
pub mod session;
pub mod signing;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{Result, SignerError};
