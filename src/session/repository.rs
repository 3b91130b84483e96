//! Session repository boundary
//!
//! Every mutation is conditional: callers pass the `version` they read (or
//! the lease they hold) and the write is rejected with `Conflict` if the row
//! moved in between. This is what keeps attempts from double-incrementing and
//! a session from being signed twice when identical requests race, across
//! any number of processes.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::model::{CreateOutcome, SigningArtifacts, SigningLease, SigningSession, MAX_ATTEMPTS};
use crate::types::{Result, SignerError};

/// Message for a lost optimistic write
pub const CONCURRENT_UPDATE: &str = "Session was modified concurrently, retry";

pub(crate) fn not_found() -> SignerError {
    SignerError::NotFound("Session not found".into())
}

pub(crate) fn concurrent_update() -> SignerError {
    SignerError::Conflict(CONCURRENT_UPDATE.into())
}

/// Durable storage of signing sessions
#[async_trait::async_trait]
pub trait SessionRepository: Send + Sync {
    /// Insert `session` unless a row for its token exists. An existing row is
    /// left untouched.
    async fn create_if_absent(&self, session: SigningSession) -> Result<CreateOutcome>;

    async fn find(&self, token: &str) -> Result<Option<SigningSession>>;

    /// `attempts += 1` if the row is still at `expected_version`, unsigned
    /// and not locked.
    async fn record_failed_attempt(&self, token: &str, expected_version: u64)
        -> Result<SigningSession>;

    /// Place `lease` if the row is still at `expected_version` and pending.
    async fn claim_signing(
        &self,
        token: &str,
        expected_version: u64,
        lease: SigningLease,
    ) -> Result<SigningSession>;

    /// Drop the lease if `holder` still owns it; a no-op otherwise.
    async fn release_signing(&self, token: &str, holder: Uuid) -> Result<()>;

    /// The terminal transition. Writes all artifacts and clears the lease in
    /// one update, only while `holder` owns an unexpired lease and the row is
    /// unsigned.
    async fn finalize_signing(
        &self,
        token: &str,
        holder: Uuid,
        artifacts: SigningArtifacts,
    ) -> Result<SigningSession>;
}

/// Process-local repository backed by a map
#[derive(Clone, Default)]
pub struct InMemorySessionRepository {
    sessions: Arc<RwLock<HashMap<String, SigningSession>>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

fn holds_lease(session: &SigningSession, holder: Uuid) -> bool {
    session
        .signing_lease
        .as_ref()
        .is_some_and(|lease| lease.holder == holder)
}

fn holds_active_lease(session: &SigningSession, holder: Uuid) -> bool {
    session
        .active_lease(Utc::now())
        .is_some_and(|lease| lease.holder == holder)
}

#[async_trait::async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn create_if_absent(&self, session: SigningSession) -> Result<CreateOutcome> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.token) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        sessions.insert(session.token.clone(), session);
        Ok(CreateOutcome::Created)
    }

    async fn find(&self, token: &str) -> Result<Option<SigningSession>> {
        Ok(self.sessions.read().await.get(token).cloned())
    }

    async fn record_failed_attempt(
        &self,
        token: &str,
        expected_version: u64,
    ) -> Result<SigningSession> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(token).ok_or_else(not_found)?;

        if session.version != expected_version || session.is_used() || session.attempts >= MAX_ATTEMPTS
        {
            return Err(concurrent_update());
        }

        session.attempts += 1;
        session.version += 1;
        Ok(session.clone())
    }

    async fn claim_signing(
        &self,
        token: &str,
        expected_version: u64,
        lease: SigningLease,
    ) -> Result<SigningSession> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(token).ok_or_else(not_found)?;

        if session.version != expected_version
            || session.is_used()
            || session.is_locked()
            || session.active_lease(Utc::now()).is_some()
        {
            return Err(concurrent_update());
        }

        session.signing_lease = Some(lease);
        session.version += 1;
        Ok(session.clone())
    }

    async fn release_signing(&self, token: &str, holder: Uuid) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(token) {
            if holds_lease(session, holder) {
                session.signing_lease = None;
                session.version += 1;
            }
        }
        Ok(())
    }

    async fn finalize_signing(
        &self,
        token: &str,
        holder: Uuid,
        artifacts: SigningArtifacts,
    ) -> Result<SigningSession> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(token).ok_or_else(not_found)?;

        if session.is_used() || !holds_active_lease(session, holder) {
            return Err(concurrent_update());
        }

        session.artifacts = Some(artifacts);
        session.signing_lease = None;
        session.version += 1;
        Ok(session.clone())
    }
}
