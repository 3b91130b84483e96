//! JetStream consumption of delivery tasks
//!
//! Messages are acknowledged only after the session row is durable. Transient
//! failures are negatively acknowledged so JetStream redelivers them, up to
//! the consumer's `max_deliver`.

use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::{self, consumer::PullConsumer, stream::Stream, AckKind};
use futures_util::StreamExt;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::service::{IssueOutcome, OtpIssuer};
use crate::types::{Result, SignerError};

/// Delay before JetStream redelivers a task that failed transiently
const REDELIVERY_DELAY: Duration = Duration::from_secs(5);

/// Messages pulled per fetch
const FETCH_BATCH: usize = 10;

#[derive(Debug, Clone)]
pub struct TaskConsumerConfig {
    pub stream: String,
    pub subject: String,
    pub consumer: String,
    pub max_deliver: i64,
}

/// How a processed message is settled with JetStream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    Nak(Duration),
}

impl Settlement {
    pub fn for_result(result: &Result<IssueOutcome>) -> Self {
        match result {
            Ok(_) => Settlement::Ack,
            Err(_) => Settlement::Nak(REDELIVERY_DELAY),
        }
    }
}

pub struct TaskConsumer {
    config: TaskConsumerConfig,
    jetstream: jetstream::Context,
    issuer: Arc<OtpIssuer>,
    running: Arc<RwLock<bool>>,
}

impl TaskConsumer {
    pub fn new(config: TaskConsumerConfig, jetstream: jetstream::Context, issuer: Arc<OtpIssuer>) -> Self {
        Self {
            config,
            jetstream,
            issuer,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Run the consumption loop until `stop` is called
    pub async fn run(&self) -> Result<()> {
        *self.running.write().await = true;

        let stream = self.ensure_stream().await?;
        let consumer = self.ensure_consumer(&stream).await?;

        info!(consumer = %self.config.consumer, "Task consumer started");

        while *self.running.read().await {
            match self.process_batch(&consumer).await {
                Ok(count) => {
                    if count > 0 {
                        debug!("Processed {} delivery tasks", count);
                    }
                }
                Err(e) => {
                    error!("Error processing task batch: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        info!(consumer = %self.config.consumer, "Task consumer stopped");
        Ok(())
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    async fn ensure_stream(&self) -> Result<Stream> {
        self.jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: self.config.stream.clone(),
                subjects: vec![self.config.subject.clone()],
                storage: jetstream::stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| SignerError::Nats(format!("Failed to create stream: {e}")))
    }

    async fn ensure_consumer(&self, stream: &Stream) -> Result<PullConsumer> {
        stream
            .get_or_create_consumer(
                &self.config.consumer,
                jetstream::consumer::pull::Config {
                    durable_name: Some(self.config.consumer.clone()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    filter_subject: self.config.subject.clone(),
                    max_deliver: self.config.max_deliver,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| SignerError::Nats(format!("Failed to create consumer: {e}")))
    }

    async fn process_batch(&self, consumer: &PullConsumer) -> Result<usize> {
        let mut messages = consumer
            .fetch()
            .max_messages(FETCH_BATCH)
            .expires(Duration::from_secs(5))
            .messages()
            .await
            .map_err(|e| SignerError::Nats(format!("Failed to fetch messages: {e}")))?;

        let mut count = 0;
        while let Some(msg_result) = messages.next().await {
            match msg_result {
                Ok(msg) => {
                    count += 1;
                    self.process_message(msg).await;
                }
                Err(e) => {
                    warn!("Error receiving task: {}", e);
                }
            }
        }

        Ok(count)
    }

    async fn process_message(&self, msg: jetstream::Message) {
        let result = self.issuer.handle_payload(&msg.payload).await;

        if let Err(e) = &result {
            warn!(error = %e, "Delivery task failed, requesting redelivery");
        }

        let settled = match Settlement::for_result(&result) {
            Settlement::Ack => msg.ack().await,
            Settlement::Nak(delay) => msg.ack_with(AckKind::Nak(Some(delay))).await,
        };
        if let Err(e) = settled {
            warn!("Failed to settle delivery task: {}", e);
        }
    }
}
