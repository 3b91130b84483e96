//! Signing session model
//!
//! One `SigningSession` exists per OTP challenge. The terminal artifacts live
//! in a single `Option<SigningArtifacts>`, so a session is either fully signed
//! or carries none of them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Result, SignerError};

/// Failed verifications allowed before a session locks
pub const MAX_ATTEMPTS: u32 = 3;

/// Upper bound on token and blob key length accepted from the outside
const MAX_FIELD_LEN: usize = 512;

/// Prefix under which signed artifacts are stored
pub const SIGNED_PREFIX: &str = "signed/";

/// Blob key of the signed copy of `original`
pub fn signed_blob_key(original: &str) -> String {
    format!("{SIGNED_PREFIX}{original}")
}

/// Where a session stands with respect to signing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Awaiting a correct code
    Pending,
    /// Attempts exhausted; no further verification accepted
    Locked,
    /// Signed and immutable
    Signed,
}

/// Time-bounded claim on the signing pipeline for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningLease {
    pub holder: Uuid,
    pub expires_at: DateTime<Utc>,
}

impl SigningLease {
    pub fn new(ttl: std::time::Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(150));
        Self {
            holder: Uuid::new_v4(),
            expires_at: Utc::now() + ttl,
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Everything written by the terminal transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningArtifacts {
    /// Sealed PKCS#8 private key (see `crypto::envelope`)
    pub encrypted_private_key: String,
    pub certificate_pem: String,
    pub signed_blob_key: String,
    pub signed_at: DateTime<Utc>,
}

/// Result of an idempotent create
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// A signing session row
#[derive(Clone, PartialEq)]
pub struct SigningSession {
    pub token: String,
    /// Recipient identity, bound into the certificate subject
    pub email: String,
    pub(crate) code_hash: String,
    pub blob_key: String,
    pub attempts: u32,
    pub artifacts: Option<SigningArtifacts>,
    pub created_at: DateTime<Utc>,
    /// Bumped by every mutation; conditional writes match on it
    pub version: u64,
    pub signing_lease: Option<SigningLease>,
}

impl SigningSession {
    /// Fresh pending session for a delivered task
    pub fn new(task: &DeliveryTask, code_hash: String) -> Self {
        Self {
            token: task.token.clone(),
            email: task.email.clone(),
            code_hash,
            blob_key: task.blob_key.clone(),
            attempts: 0,
            artifacts: None,
            created_at: Utc::now(),
            version: 0,
            signing_lease: None,
        }
    }

    pub fn is_used(&self) -> bool {
        self.artifacts.is_some()
    }

    pub fn is_locked(&self) -> bool {
        self.attempts >= MAX_ATTEMPTS
    }

    /// Locked is reported ahead of Signed, matching the order requests are
    /// checked in.
    pub fn state(&self) -> SessionState {
        if self.is_locked() {
            SessionState::Locked
        } else if self.is_used() {
            SessionState::Signed
        } else {
            SessionState::Pending
        }
    }

    pub fn remaining_attempts(&self) -> u32 {
        MAX_ATTEMPTS.saturating_sub(self.attempts)
    }

    /// The lease, if one is held and not yet expired
    pub fn active_lease(&self, now: DateTime<Utc>) -> Option<&SigningLease> {
        self.signing_lease.as_ref().filter(|lease| lease.is_active(now))
    }

    pub(crate) fn code_hash(&self) -> &str {
        &self.code_hash
    }
}

impl fmt::Debug for SigningSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningSession")
            .field("token", &self.token)
            .field("email", &self.email)
            .field("code_hash", &"<redacted>")
            .field("blob_key", &self.blob_key)
            .field("attempts", &self.attempts)
            .field("is_used", &self.is_used())
            .field("created_at", &self.created_at)
            .field("version", &self.version)
            .field("signing_lease", &self.signing_lease)
            .finish()
    }
}

/// Body of `POST /api/sign`
#[derive(Clone, Deserialize)]
pub struct SignRequest {
    pub token: String,
    pub password: String,
}

impl SignRequest {
    pub fn validate(&self) -> Result<()> {
        if self.token.trim().is_empty()
            || self.token.len() > MAX_FIELD_LEN
            || self.password.is_empty()
            || self.password.len() > MAX_FIELD_LEN
        {
            return Err(SignerError::BadRequest("Invalid request".into()));
        }
        Ok(())
    }
}

impl fmt::Debug for SignRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignRequest")
            .field("token", &self.token)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Task published by the upload ingestor once a document is stored
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryTask {
    pub token: String,
    pub email: String,
    #[serde(rename = "s3_key")]
    pub blob_key: String,
}

impl DeliveryTask {
    pub fn validate(&self) -> Result<()> {
        if self.token.trim().is_empty() || self.token.len() > MAX_FIELD_LEN {
            return Err(SignerError::BadRequest("Task token is missing".into()));
        }
        if self.blob_key.trim().is_empty() || self.blob_key.len() > MAX_FIELD_LEN {
            return Err(SignerError::BadRequest("Task blob key is missing".into()));
        }
        if self.blob_key.starts_with(SIGNED_PREFIX) {
            return Err(SignerError::BadRequest(
                "Task blob key points at a signed artifact".into(),
            ));
        }
        let email = self.email.trim();
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() && email.len() <= 254 => {
                Ok(())
            }
            _ => Err(SignerError::BadRequest("Task email is invalid".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> DeliveryTask {
        DeliveryTask {
            token: "t1".into(),
            email: "a@b.com".into(),
            blob_key: "doc.pdf".into(),
        }
    }

    fn artifacts() -> SigningArtifacts {
        SigningArtifacts {
            encrypted_private_key: "sealed".into(),
            certificate_pem: "-----BEGIN CERTIFICATE-----".into(),
            signed_blob_key: signed_blob_key("doc.pdf"),
            signed_at: Utc::now(),
        }
    }

    #[test]
    fn test_delivery_task_wire_format() {
        let parsed: DeliveryTask =
            serde_json::from_str(r#"{"token":"t1","email":"a@b.com","s3_key":"doc.pdf"}"#).unwrap();
        assert_eq!(parsed, task());

        let json = serde_json::to_value(task()).unwrap();
        assert_eq!(json["s3_key"], "doc.pdf");
        assert!(json.get("blob_key").is_none());
    }

    #[test]
    fn test_delivery_task_validation() {
        assert!(task().validate().is_ok());

        let mut bad = task();
        bad.email = "not-an-email".into();
        assert!(bad.validate().is_err());

        let mut bad = task();
        bad.token = "  ".into();
        assert!(bad.validate().is_err());

        let mut bad = task();
        bad.blob_key = "signed/doc.pdf".into();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_sign_request_validation() {
        let ok = SignRequest {
            token: "t1".into(),
            password: "123456".into(),
        };
        assert!(ok.validate().is_ok());

        let empty = SignRequest {
            token: "".into(),
            password: "123456".into(),
        };
        assert_eq!(empty.validate().unwrap_err().public_message(), "Invalid request");

        let long = SignRequest {
            token: "t1".into(),
            password: "1".repeat(MAX_FIELD_LEN + 1),
        };
        assert!(long.validate().is_err());
    }

    #[test]
    fn test_state_transitions() {
        let mut session = SigningSession::new(&task(), "$argon2id$...".into());
        assert_eq!(session.state(), SessionState::Pending);
        assert_eq!(session.remaining_attempts(), 3);

        session.artifacts = Some(artifacts());
        assert_eq!(session.state(), SessionState::Signed);
        assert!(session.is_used());

        session.attempts = MAX_ATTEMPTS;
        assert_eq!(session.state(), SessionState::Locked);
        assert_eq!(session.remaining_attempts(), 0);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let session = SigningSession::new(&task(), "$argon2id$v=19$secret".into());
        let debug = format!("{:?}", session);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("<redacted>"));

        let request = SignRequest {
            token: "t1".into(),
            password: "654321".into(),
        };
        assert!(!format!("{:?}", request).contains("654321"));
    }

    #[test]
    fn test_lease_expiry() {
        let mut session = SigningSession::new(&task(), String::new());
        let now = Utc::now();

        session.signing_lease = Some(SigningLease {
            holder: Uuid::new_v4(),
            expires_at: now + chrono::Duration::seconds(30),
        });
        assert!(session.active_lease(now).is_some());
        assert!(session.active_lease(now + chrono::Duration::seconds(31)).is_none());
    }

    #[test]
    fn test_signed_blob_key() {
        assert_eq!(signed_blob_key("doc.pdf"), "signed/doc.pdf");
    }
}
