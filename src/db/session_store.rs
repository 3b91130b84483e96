//! MongoDB-backed session repository
//!
//! Each transition is a single `find_one_and_update` whose filter encodes the
//! precondition, so two processes racing on the same token cannot both win.

use bson::{doc, DateTime, Document};
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use super::mongo::{MongoClient, MongoCollection};
use super::schemas::{SigningLeaseDoc, SigningSessionDoc, SIGNING_SESSION_COLLECTION};
use crate::session::repository::{concurrent_update, not_found};
use crate::session::{
    CreateOutcome, SessionRepository, SigningArtifacts, SigningLease, SigningSession, MAX_ATTEMPTS,
};
use crate::types::{Result, SignerError};

#[derive(Clone)]
pub struct MongoSessionRepository {
    collection: MongoCollection<SigningSessionDoc>,
}

impl MongoSessionRepository {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        let collection = client
            .collection::<SigningSessionDoc>(SIGNING_SESSION_COLLECTION)
            .await?;
        Ok(Self { collection })
    }

    /// Apply a conditional update; if nothing matched, tell NotFound apart
    /// from a lost race.
    async fn transition(&self, token: &str, filter: Document, update: Document) -> Result<SigningSession> {
        match self.collection.find_one_and_update(filter, update).await? {
            Some(doc) => SigningSession::try_from(doc),
            None => match self.collection.find_one(doc! { "token": token }).await? {
                Some(_) => Err(concurrent_update()),
                None => Err(not_found()),
            },
        }
    }
}

fn to_db_version(version: u64) -> Result<i64> {
    i64::try_from(version).map_err(|_| SignerError::Database("Session version overflow".into()))
}

#[async_trait::async_trait]
impl SessionRepository for MongoSessionRepository {
    async fn create_if_absent(&self, session: SigningSession) -> Result<CreateOutcome> {
        let token = session.token.clone();
        let inserted = self
            .collection
            .insert_if_absent(doc! { "token": token.as_str() }, SigningSessionDoc::from(&session))
            .await?;

        debug!(token = %token, inserted, "Session create");

        Ok(if inserted {
            CreateOutcome::Created
        } else {
            CreateOutcome::AlreadyExists
        })
    }

    async fn find(&self, token: &str) -> Result<Option<SigningSession>> {
        self.collection
            .find_one(doc! { "token": token })
            .await?
            .map(SigningSession::try_from)
            .transpose()
    }

    async fn record_failed_attempt(
        &self,
        token: &str,
        expected_version: u64,
    ) -> Result<SigningSession> {
        let filter = doc! {
            "token": token,
            "version": to_db_version(expected_version)?,
            "is_used": false,
            "attempts": { "$lt": (MAX_ATTEMPTS as i32) },
        };
        let update = doc! { "$inc": { "attempts": 1, "version": 1_i64 } };

        self.transition(token, filter, update).await
    }

    async fn claim_signing(
        &self,
        token: &str,
        expected_version: u64,
        lease: SigningLease,
    ) -> Result<SigningSession> {
        let filter = doc! {
            "token": token,
            "version": to_db_version(expected_version)?,
            "is_used": false,
            "attempts": { "$lt": (MAX_ATTEMPTS as i32) },
            "$or": [
                { "signing_lease": null },
                { "signing_lease.expires_at": { "$lte": DateTime::from_chrono(Utc::now()) } },
            ],
        };
        let lease = bson::to_bson(&SigningLeaseDoc::from(&lease))?;
        let update = doc! {
            "$set": { "signing_lease": lease },
            "$inc": { "version": 1_i64 },
        };

        self.transition(token, filter, update).await
    }

    async fn release_signing(&self, token: &str, holder: Uuid) -> Result<()> {
        let filter = doc! {
            "token": token,
            "signing_lease.holder": holder.to_string(),
        };
        let update = doc! {
            "$set": { "signing_lease": null },
            "$inc": { "version": 1_i64 },
        };

        let result = self.collection.update_one(filter, update).await?;
        debug!(token = %token, released = result.modified_count, "Signing lease release");
        Ok(())
    }

    async fn finalize_signing(
        &self,
        token: &str,
        holder: Uuid,
        artifacts: SigningArtifacts,
    ) -> Result<SigningSession> {
        let filter = doc! {
            "token": token,
            "is_used": false,
            "signing_lease.holder": holder.to_string(),
            "signing_lease.expires_at": { "$gt": DateTime::from_chrono(Utc::now()) },
        };
        let update = doc! {
            "$set": {
                "is_used": true,
                "encrypted_private_key": artifacts.encrypted_private_key,
                "certificate_pem": artifacts.certificate_pem,
                "signed_blob_key": artifacts.signed_blob_key,
                "signed_at": DateTime::from_chrono(artifacts.signed_at),
                "signing_lease": null,
            },
            "$inc": { "version": 1_i64 },
        };

        self.transition(token, filter, update).await
    }
}
