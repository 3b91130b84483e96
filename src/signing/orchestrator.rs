//! Signing orchestrator
//!
//! Drives a `SignRequest` through the session state machine:
//!
//! ```text
//!   Pending --wrong code--> Pending (attempts + 1) --3rd miss--> Locked
//!   Pending --right code--> [lease] --> pipeline --> finalize --> Signed
//! ```
//!
//! The pipeline (key pair, certificate, seal, fetch, external sign, store)
//! persists nothing to the session. Only `finalize_signing` writes, and it
//! writes every artifact at once. A failed pipeline releases its lease and
//! leaves the session exactly as it was, so the same code can be resubmitted.
//!
//! The lease is what limits the external signer to one call per token at a
//! time across every instance of the service.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::blob::{BlobStore, PDF_CONTENT_TYPE};
use crate::crypto::{certificate, envelope, otp, MasterKey};
use crate::nats::SignedArtifactEvent;
use crate::services::DocumentSigner;
use crate::session::{
    signed_blob_key, SessionRepository, SessionState, SignRequest, SigningArtifacts, SigningLease,
    SigningSession,
};
use crate::types::{PipelineStage, Result, SignerError};

pub const SESSION_LOCKED: &str = "Too many attempts. Session blocked.";
pub const ALREADY_SIGNED: &str = "Document already signed";
pub const SIGNING_IN_PROGRESS: &str = "Signing already in progress, retry shortly";

/// A quarter of the lease is held back for finalize and release
const LEASE_RESERVE_DIVISOR: u32 = 4;

/// Receives an event after every terminal transition
#[async_trait]
pub trait ArtifactNotifier: Send + Sync {
    async fn notify(&self, event: &SignedArtifactEvent) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SigningConfig {
    /// Deadline for each repository, blob store and signer call
    pub call_timeout: Duration,
    /// How long a claim on the pipeline stays exclusive
    pub lease_ttl: Duration,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            lease_ttl: Duration::from_secs(150),
        }
    }
}

/// Successful signing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignOutcome {
    pub token: String,
    pub signed_blob_key: String,
    /// Relative download URL of the signed document
    pub signed_url: String,
}

pub fn signed_download_url(token: &str) -> String {
    format!("/download/{}?signed=1", token)
}

pub struct SigningOrchestrator {
    config: SigningConfig,
    master_key: MasterKey,
    repository: Arc<dyn SessionRepository>,
    blob_store: Arc<dyn BlobStore>,
    signer: Arc<dyn DocumentSigner>,
    notifier: Option<Arc<dyn ArtifactNotifier>>,
}

impl SigningOrchestrator {
    pub fn new(
        config: SigningConfig,
        master_key: MasterKey,
        repository: Arc<dyn SessionRepository>,
        blob_store: Arc<dyn BlobStore>,
        signer: Arc<dyn DocumentSigner>,
    ) -> Self {
        Self {
            config,
            master_key,
            repository,
            blob_store,
            signer,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ArtifactNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Handle one signing request
    pub async fn sign(&self, request: SignRequest) -> Result<SignOutcome> {
        request.validate()?;
        let token = request.token.as_str();

        let session = self
            .repo_call(self.repository.find(token))
            .await?
            .ok_or_else(|| SignerError::NotFound("Session not found".into()))?;

        match session.state() {
            SessionState::Locked => return Err(SignerError::Forbidden(SESSION_LOCKED.into())),
            SessionState::Signed => return Err(SignerError::Forbidden(ALREADY_SIGNED.into())),
            SessionState::Pending => {}
        }

        if session.active_lease(Utc::now()).is_some() {
            debug!(token = %token, "Signing lease held elsewhere");
            return Err(SignerError::Conflict(SIGNING_IN_PROGRESS.into()));
        }

        let valid =
            otp::verify_code_blocking(session.code_hash().to_string(), request.password.clone())
                .await?;

        if !valid {
            let updated = self
                .repo_call(self.repository.record_failed_attempt(token, session.version))
                .await?;
            info!(
                token = %token,
                attempts = updated.attempts,
                "Invalid code submitted"
            );
            return Err(SignerError::InvalidCode {
                remaining: updated.remaining_attempts(),
            });
        }

        let lease = SigningLease::new(self.config.lease_ttl);
        let holder = lease.holder;
        let claimed = self
            .repo_call(self.repository.claim_signing(token, session.version, lease))
            .await
            .map_err(|e| match e {
                SignerError::Conflict(_) => SignerError::Conflict(SIGNING_IN_PROGRESS.into()),
                other => other,
            })?;

        debug!(token = %token, holder = %holder, "Signing lease acquired");

        let budget = claimed
            .signing_lease
            .as_ref()
            .map(|lease| self.pipeline_budget(lease))
            .unwrap_or_default();
        let pipeline = match tokio::time::timeout(budget, self.run_pipeline(&claimed)).await {
            Ok(result) => result,
            Err(_) => Err(SignerError::at_stage(
                PipelineStage::Deadline,
                format!("not finished within {:?} of lease", budget),
            )),
        };

        let artifacts = match pipeline {
            Ok(artifacts) => artifacts,
            Err(e) => {
                warn!(
                    token = %token,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Signing pipeline failed, session left pending"
                );
                self.release(token, holder).await;
                return Err(e);
            }
        };

        let signed_blob_key = artifacts.signed_blob_key.clone();
        let signed_at = artifacts.signed_at;

        if let Err(e) = self
            .repo_call(self.repository.finalize_signing(token, holder, artifacts))
            .await
        {
            warn!(token = %token, error = %e, "Failed to record signature");
            self.release(token, holder).await;
            return Err(match e {
                SignerError::Conflict(_) => SignerError::Conflict(SIGNING_IN_PROGRESS.into()),
                other => SignerError::at_stage(PipelineStage::Finalize, other),
            });
        }

        info!(token = %token, signed_blob_key = %signed_blob_key, "Document signed");

        self.notify(SignedArtifactEvent {
            token: token.to_string(),
            signed_blob_key: signed_blob_key.clone(),
            signed_at,
        })
        .await;

        Ok(SignOutcome {
            token: token.to_string(),
            signed_url: signed_download_url(token),
            signed_blob_key,
        })
    }

    /// Decrypt the private key stored for a signed session
    pub async fn recover_private_key(&self, token: &str) -> Result<Zeroizing<String>> {
        let session = self
            .repo_call(self.repository.find(token))
            .await?
            .ok_or_else(|| SignerError::NotFound("Session not found".into()))?;

        let artifacts = session
            .artifacts
            .as_ref()
            .ok_or_else(|| SignerError::Forbidden("Document not signed".into()))?;

        let plaintext = envelope::open(&self.master_key, &artifacts.encrypted_private_key)?;
        let pem = std::str::from_utf8(&plaintext)
            .map_err(|_| SignerError::Crypto("Recovered key is not valid UTF-8".into()))?;

        Ok(Zeroizing::new(pem.to_string()))
    }

    /// Look up a session without exposing anything secret
    pub async fn session(&self, token: &str) -> Result<Option<SigningSession>> {
        self.repo_call(self.repository.find(token)).await
    }

    async fn run_pipeline(&self, session: &SigningSession) -> Result<SigningArtifacts> {
        let email = session.email.clone();
        let credentials = tokio::task::spawn_blocking(move || {
            let private_key = certificate::generate_key_pair()
                .map_err(|e| SignerError::at_stage(PipelineStage::KeyGeneration, e))?;
            certificate::issue_certificate(&email, &private_key)
                .map_err(|e| SignerError::at_stage(PipelineStage::Certificate, e))
        })
        .await
        .map_err(|e| SignerError::at_stage(PipelineStage::KeyGeneration, e))??;

        let encrypted_private_key =
            envelope::seal(&self.master_key, credentials.private_key_pem.as_bytes())
                .map_err(|e| SignerError::at_stage(PipelineStage::Encryption, e))?;

        let document = self
            .stage(PipelineStage::LoadDocument, self.blob_store.fetch(&session.blob_key))
            .await?;

        let signed = self
            .stage(
                PipelineStage::ExternalSign,
                self.signer.sign(
                    document,
                    &credentials.certificate_pem,
                    &credentials.private_key_pem,
                ),
            )
            .await?;

        let signed_key = signed_blob_key(&session.blob_key);
        self.stage(
            PipelineStage::StoreSigned,
            self.blob_store.store(&signed_key, signed, PDF_CONTENT_TYPE),
        )
        .await?;

        Ok(SigningArtifacts {
            encrypted_private_key,
            certificate_pem: credentials.certificate_pem.clone(),
            signed_blob_key: signed_key,
            signed_at: Utc::now(),
        })
    }

    /// Time left on `lease`, minus a reserve for the terminal write. A
    /// pipeline cut off here never outlives its lease, so no second holder
    /// can be signing the same token.
    fn pipeline_budget(&self, lease: &SigningLease) -> Duration {
        let reserve = self.config.lease_ttl / LEASE_RESERVE_DIVISOR;
        (lease.expires_at - Utc::now())
            .to_std()
            .unwrap_or_default()
            .saturating_sub(reserve)
    }

    async fn release(&self, token: &str, holder: Uuid) {
        if let Err(e) = self
            .repo_call(self.repository.release_signing(token, holder))
            .await
        {
            warn!(token = %token, error = %e, "Failed to release signing lease; it will expire");
        }
    }

    async fn notify(&self, event: SignedArtifactEvent) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        match tokio::time::timeout(self.config.call_timeout, notifier.notify(&event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(token = %event.token, error = %e, "Failed to publish signed event"),
            Err(_) => warn!(token = %event.token, "Publishing signed event timed out"),
        }
    }

    async fn repo_call<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.config.call_timeout, call)
            .await
            .map_err(|_| SignerError::Database("Repository call timed out".into()))?
    }

    async fn stage<T>(
        &self,
        stage: PipelineStage,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(result) => result.map_err(|e| SignerError::at_stage(stage, e)),
            Err(_) => Err(SignerError::at_stage(stage, "timed out")),
        }
    }
}
