//! NATS-backed outbound notifications

use async_trait::async_trait;
use bytes::Bytes;

use super::client::NatsClient;
use super::messages::{OtpNotice, SignedArtifactEvent};
use crate::issuer::CodeDispatcher;
use crate::signing::ArtifactNotifier;
use crate::types::{Result, SignerError};

/// Publishes OTP notices for the notification service
#[derive(Clone)]
pub struct NatsCodeDispatcher {
    client: NatsClient,
    subject: String,
}

impl NatsCodeDispatcher {
    pub fn new(client: NatsClient, subject: impl Into<String>) -> Self {
        Self {
            client,
            subject: subject.into(),
        }
    }
}

#[async_trait]
impl CodeDispatcher for NatsCodeDispatcher {
    async fn dispatch(&self, notice: &OtpNotice) -> Result<()> {
        let payload = serde_json::to_vec(notice)
            .map_err(|e| SignerError::Internal(format!("Failed to encode OTP notice: {}", e)))?;
        self.client.publish(&self.subject, Bytes::from(payload)).await
    }
}

/// Publishes signed-artifact events
#[derive(Clone)]
pub struct NatsArtifactNotifier {
    client: NatsClient,
    subject: String,
}

impl NatsArtifactNotifier {
    pub fn new(client: NatsClient, subject: impl Into<String>) -> Self {
        Self {
            client,
            subject: subject.into(),
        }
    }
}

#[async_trait]
impl ArtifactNotifier for NatsArtifactNotifier {
    async fn notify(&self, event: &SignedArtifactEvent) -> Result<()> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| SignerError::Internal(format!("Failed to encode event: {}", e)))?;
        self.client.publish(&self.subject, Bytes::from(payload)).await
    }
}
