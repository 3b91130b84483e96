//! NATS connection shared by the task consumer and the publishers

use std::time::Duration;

use async_nats::{jetstream, Client, ConnectOptions};
use bytes::Bytes;
use tracing::{debug, info};

use crate::config::NatsArgs;
use crate::types::SignerError;

const PING_INTERVAL: Duration = Duration::from_secs(120);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct NatsClient {
    client: Client,
}

fn connect_options(args: &NatsArgs, name: &str) -> ConnectOptions {
    let options = ConnectOptions::new()
        .name(name)
        .ping_interval(PING_INTERVAL)
        .connection_timeout(CONNECT_TIMEOUT);

    match (&args.nats_user, &args.nats_password) {
        (Some(user), Some(pass)) => options.user_and_password(user.clone(), pass.clone()),
        _ => options,
    }
}

impl NatsClient {
    /// Connect once. A server that is down at startup is a startup error;
    /// later disconnects are retried by async-nats itself.
    pub async fn new(args: &NatsArgs, name: &str) -> Result<Self, SignerError> {
        info!(name = %name, "Connecting to NATS at {}", args.nats_url);

        let client = connect_options(args, name)
            .connect(&args.nats_url)
            .await
            .map_err(|e| SignerError::Nats(format!("Failed to connect: {}", e)))?;

        info!("Connected to NATS at {}", args.nats_url);
        Ok(Self { client })
    }

    pub fn jetstream(&self) -> jetstream::Context {
        jetstream::new(self.client.clone())
    }

    /// Publish and flush, so success means the payload reached the server
    pub async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), SignerError> {
        let len = payload.len();
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| SignerError::Nats(format!("Publish to {} failed: {}", subject, e)))?;
        self.client
            .flush()
            .await
            .map_err(|e| SignerError::Nats(format!("Flush after {} failed: {}", subject, e)))?;

        debug!(subject = %subject, bytes = len, "Published");
        Ok(())
    }
}
