//! Cryptographic primitives for signing sessions
//!
//! - `otp`: passcode generation plus Argon2id hashing and verification
//! - `certificate`: ephemeral RSA key pair and self-signed X.509 certificate
//! - `envelope`: ChaCha20-Poly1305 sealing of private keys under the master key
//!
//! Everything here is stateless. The master key is passed in by the caller.

pub mod certificate;
pub mod envelope;
pub mod otp;

pub use certificate::{issue_certificate, issue_key_and_certificate, IssuedCredentials};
pub use envelope::{open, seal, MasterKey};
pub use otp::{generate_code, hash_code, verify_code};

