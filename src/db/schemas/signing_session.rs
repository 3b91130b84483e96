//! Signing session schema
//!
//! One document per OTP challenge, keyed by the upload token. `version` is
//! bumped by every update and used as the optimistic concurrency check.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::metadata::Metadata;
use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::session::{SigningArtifacts, SigningLease, SigningSession};
use crate::types::SignerError;

/// Collection name for signing sessions
pub const SIGNING_SESSION_COLLECTION: &str = "signing_sessions";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SigningLeaseDoc {
    /// Lease holder id (UUID string)
    pub holder: String,
    pub expires_at: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SigningSessionDoc {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub token: String,

    #[serde(default)]
    pub email: String,

    /// Argon2id PHC string of the passcode
    #[serde(default)]
    pub code_hash: String,

    #[serde(default)]
    pub blob_key: String,

    #[serde(default)]
    pub attempts: i32,

    #[serde(default)]
    pub is_used: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_private_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_pem: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_blob_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_at: Option<DateTime>,

    #[serde(default)]
    pub version: i64,

    #[serde(default)]
    pub signing_lease: Option<SigningLeaseDoc>,
}

impl IntoIndexes for SigningSessionDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "token": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("token_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for SigningSessionDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

impl From<&SigningLease> for SigningLeaseDoc {
    fn from(lease: &SigningLease) -> Self {
        Self {
            holder: lease.holder.to_string(),
            expires_at: DateTime::from_chrono(lease.expires_at),
        }
    }
}

impl TryFrom<SigningLeaseDoc> for SigningLease {
    type Error = SignerError;

    fn try_from(doc: SigningLeaseDoc) -> Result<Self, Self::Error> {
        let holder = Uuid::parse_str(&doc.holder)
            .map_err(|e| SignerError::Database(format!("Invalid lease holder: {}", e)))?;
        Ok(Self {
            holder,
            expires_at: doc.expires_at.to_chrono(),
        })
    }
}

impl From<&SigningSession> for SigningSessionDoc {
    fn from(session: &SigningSession) -> Self {
        let artifacts = session.artifacts.as_ref();
        Self {
            id: None,
            metadata: Metadata::created(DateTime::from_chrono(session.created_at)),
            token: session.token.clone(),
            email: session.email.clone(),
            code_hash: session.code_hash.clone(),
            blob_key: session.blob_key.clone(),
            attempts: session.attempts as i32,
            is_used: artifacts.is_some(),
            encrypted_private_key: artifacts.map(|a| a.encrypted_private_key.clone()),
            certificate_pem: artifacts.map(|a| a.certificate_pem.clone()),
            signed_blob_key: artifacts.map(|a| a.signed_blob_key.clone()),
            signed_at: artifacts.map(|a| DateTime::from_chrono(a.signed_at)),
            version: session.version as i64,
            signing_lease: session.signing_lease.as_ref().map(SigningLeaseDoc::from),
        }
    }
}

impl TryFrom<SigningSessionDoc> for SigningSession {
    type Error = SignerError;

    fn try_from(doc: SigningSessionDoc) -> Result<Self, Self::Error> {
        let artifacts = match (
            doc.is_used,
            doc.encrypted_private_key,
            doc.certificate_pem,
            doc.signed_blob_key,
            doc.signed_at,
        ) {
            (true, Some(encrypted_private_key), Some(certificate_pem), Some(signed_blob_key), Some(signed_at)) => {
                Some(SigningArtifacts {
                    encrypted_private_key,
                    certificate_pem,
                    signed_blob_key,
                    signed_at: signed_at.to_chrono(),
                })
            }
            (false, None, None, None, None) => None,
            _ => {
                return Err(SignerError::Database(format!(
                    "Session {} has partial signing artifacts",
                    doc.token
                )))
            }
        };

        let attempts = u32::try_from(doc.attempts).map_err(|_| {
            SignerError::Database(format!("Session {} has invalid attempts {}", doc.token, doc.attempts))
        })?;
        let version = u64::try_from(doc.version).map_err(|_| {
            SignerError::Database(format!("Session {} has invalid version {}", doc.token, doc.version))
        })?;

        Ok(SigningSession {
            created_at: doc
                .metadata
                .created_at
                .map(DateTime::to_chrono)
                .unwrap_or_default(),
            token: doc.token,
            email: doc.email,
            code_hash: doc.code_hash,
            blob_key: doc.blob_key,
            attempts,
            artifacts,
            version,
            signing_lease: doc.signing_lease.map(SigningLease::try_from).transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{signed_blob_key, DeliveryTask};
    use chrono::{SubsecRound, Utc};

    fn session() -> SigningSession {
        let task = DeliveryTask {
            token: "t1".into(),
            email: "a@b.com".into(),
            blob_key: "doc.pdf".into(),
        };
        let mut session = SigningSession::new(&task, "$argon2id$hash".into());
        session.created_at = session.created_at.trunc_subsecs(3);
        session
    }

    #[test]
    fn test_pending_session_document_shape() {
        let doc = bson::to_document(&SigningSessionDoc::from(&session())).unwrap();

        assert_eq!(doc.get_str("token").unwrap(), "t1");
        assert_eq!(doc.get_str("blob_key").unwrap(), "doc.pdf");
        assert_eq!(doc.get_i32("attempts").unwrap(), 0);
        assert!(!doc.get_bool("is_used").unwrap());
        assert!(doc.get("certificate_pem").is_none());
        assert!(doc.get("_id").is_none());
    }

    #[test]
    fn test_signed_session_converts_back() {
        let mut signed = session();
        signed.attempts = 1;
        signed.version = 4;
        signed.artifacts = Some(SigningArtifacts {
            encrypted_private_key: "sealed".into(),
            certificate_pem: "cert".into(),
            signed_blob_key: signed_blob_key("doc.pdf"),
            signed_at: Utc::now().trunc_subsecs(3),
        });

        let back = SigningSession::try_from(SigningSessionDoc::from(&signed)).unwrap();
        assert_eq!(back, signed);
    }

    #[test]
    fn test_lease_converts_back() {
        let mut leased = session();
        leased.signing_lease = Some(SigningLease {
            holder: Uuid::new_v4(),
            expires_at: Utc::now().trunc_subsecs(3),
        });

        let back = SigningSession::try_from(SigningSessionDoc::from(&leased)).unwrap();
        assert_eq!(back.signing_lease, leased.signing_lease);
    }

    #[test]
    fn test_partial_artifacts_are_rejected() {
        let mut doc = SigningSessionDoc::from(&session());
        doc.is_used = true;
        doc.certificate_pem = Some("cert".into());

        assert!(matches!(
            SigningSession::try_from(doc),
            Err(SignerError::Database(_))
        ));
    }

    #[test]
    fn test_negative_counters_are_rejected() {
        let mut doc = SigningSessionDoc::from(&session());
        doc.attempts = -1;
        assert!(matches!(
            SigningSession::try_from(doc),
            Err(SignerError::Database(_))
        ));

        let mut doc = SigningSessionDoc::from(&session());
        doc.version = -5;
        assert!(matches!(
            SigningSession::try_from(doc),
            Err(SignerError::Database(_))
        ));
    }
}
