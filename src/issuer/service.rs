//! OTP issuance for delivered upload tasks
//!
//! One task in, at most one session out. The plaintext code goes to the
//! `CodeDispatcher` and nowhere else; the repository only sees its hash.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use crate::crypto::otp;
use crate::nats::OtpNotice;
use crate::session::{CreateOutcome, DeliveryTask, SessionRepository, SigningSession};
use crate::types::{Result, SignerError};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Out-of-band channel that gets the plaintext code to the recipient
#[async_trait]
pub trait CodeDispatcher: Send + Sync {
    async fn dispatch(&self, notice: &OtpNotice) -> Result<()>;
}

/// What became of one delivered task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueOutcome {
    /// New session stored and the code handed to the dispatcher
    Created,
    /// A session already existed for the token; nothing changed
    Duplicate,
    /// Payload could not be used; retrying will not help
    Dropped(String),
}

pub struct OtpIssuer {
    repository: Arc<dyn SessionRepository>,
    dispatcher: Arc<dyn CodeDispatcher>,
    call_timeout: Duration,
}

impl OtpIssuer {
    pub fn new(repository: Arc<dyn SessionRepository>, dispatcher: Arc<dyn CodeDispatcher>) -> Self {
        Self {
            repository,
            dispatcher,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Deadline for each repository call
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Handle a raw task payload.
    ///
    /// `Err` means a transient failure (RNG, hashing, repository) and the
    /// task should be redelivered. Malformed payloads come back as
    /// `Ok(IssueOutcome::Dropped)`.
    pub async fn handle_payload(&self, payload: &[u8]) -> Result<IssueOutcome> {
        let task: DeliveryTask = match serde_json::from_slice(payload) {
            Ok(task) => task,
            Err(e) => {
                warn!(error = %e, "Dropping malformed delivery task");
                return Ok(IssueOutcome::Dropped(format!("malformed payload: {}", e)));
            }
        };
        self.issue(task).await
    }

    pub async fn issue(&self, task: DeliveryTask) -> Result<IssueOutcome> {
        if let Err(e) = task.validate() {
            warn!(token = %task.token, error = %e, "Dropping invalid delivery task");
            return Ok(IssueOutcome::Dropped(e.to_string()));
        }

        // Skip the Argon2 work for a redelivery we have already handled.
        if self.repo_call(self.repository.find(&task.token)).await?.is_some() {
            debug!(token = %task.token, "Session already exists, ignoring redelivery");
            return Ok(IssueOutcome::Duplicate);
        }

        let code = Zeroizing::new(otp::generate_code()?);
        let code_hash = otp::hash_code_blocking(code.to_string()).await?;

        let session = SigningSession::new(&task, code_hash);
        match self.repo_call(self.repository.create_if_absent(session)).await? {
            CreateOutcome::AlreadyExists => {
                debug!(token = %task.token, "Session created concurrently, ignoring");
                return Ok(IssueOutcome::Duplicate);
            }
            CreateOutcome::Created => {}
        }

        info!(token = %task.token, email = %task.email, "Signing session created");

        let notice = OtpNotice {
            token: task.token.clone(),
            email: task.email.clone(),
            code: code.to_string(),
        };
        // The row is durable at this point; a failed dispatch must not cause a
        // redelivery that would be ignored anyway.
        if let Err(e) = self.dispatcher.dispatch(&notice).await {
            error!(token = %task.token, error = %e, "Failed to dispatch OTP notice");
        }

        Ok(IssueOutcome::Created)
    }

    async fn repo_call<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| SignerError::Database("Repository call timed out".into()))?
    }
}
