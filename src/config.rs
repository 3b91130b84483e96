//! Configuration for cosigner
//!
//! CLI arguments with environment fallbacks using clap. A `.env` file is
//! loaded by the binary before parsing.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use uuid::Uuid;

use crate::crypto::MasterKey;
use crate::types::{Result, SignerError};

/// Cosigner - OTP-gated document co-signing
#[derive(Parser, Debug, Clone)]
#[command(name = "cosigner")]
#[command(about = "OTP-gated document co-signing with ephemeral certificates")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format: "text" or "json"
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// NATS configuration
    #[command(flatten)]
    pub nats: NatsArgs,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "cosigner")]
    pub mongodb_db: String,

    /// JetStream stream carrying delivery tasks
    #[arg(long, env = "TASK_STREAM", default_value = "SIGNER_TASKS")]
    pub task_stream: String,

    /// Subject delivery tasks are published on
    #[arg(long, env = "TASK_SUBJECT", default_value = "signer.tasks")]
    pub task_subject: String,

    /// Durable consumer name shared by every instance
    #[arg(long, env = "TASK_CONSUMER", default_value = "otp_issuer")]
    pub task_consumer: String,

    /// Subject OTP notices are published on for the notification service
    #[arg(long, env = "OTP_SUBJECT", default_value = "signer.otp")]
    pub otp_subject: String,

    /// Subject signed-artifact events are published on
    #[arg(long, env = "EVENT_SUBJECT", default_value = "signer.signed")]
    pub event_subject: String,

    /// Base URL of the blob store; objects live at `{url}/{key}`
    #[arg(long, env = "BLOB_STORE_URL", default_value = "http://localhost:9000/documents")]
    pub blob_store_url: String,

    /// Bearer token for the blob store (optional)
    #[arg(long, env = "BLOB_STORE_TOKEN", hide_env_values = true)]
    pub blob_store_token: Option<String>,

    /// External signer endpoint (required)
    #[arg(long, env = "SIGNER_URL")]
    pub signer_url: Option<String>,

    /// Hex-encoded 256-bit master key for private keys at rest (required)
    #[arg(long, env = "MASTER_KEY_HEX", hide_env_values = true)]
    pub master_key_hex: Option<String>,

    /// Per-call timeout for repository, blob store and signer calls
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// How long a signing claim stays exclusive; must exceed four request timeouts
    #[arg(long, env = "SIGNING_LEASE_SECS", default_value = "150")]
    pub signing_lease_secs: u64,

    /// Deliveries of one task before JetStream gives up on it
    #[arg(long, env = "MAX_TASK_DELIVERIES", default_value = "5")]
    pub max_task_deliveries: i64,
}

/// NATS connection configuration
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD", hide_env_values = true)]
    pub nats_password: Option<String>,
}

impl Args {
    /// Decode the master key
    pub fn master_key(&self) -> Result<MasterKey> {
        let encoded = self
            .master_key_hex
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| SignerError::Config("MASTER_KEY_HEX is required".into()))?;
        MasterKey::from_hex(encoded)
    }

    pub fn signer_url(&self) -> Result<&str> {
        self.signer_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SignerError::Config("SIGNER_URL is required".into()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn signing_lease(&self) -> Duration {
        Duration::from_secs(self.signing_lease_secs)
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }

    /// Validate configuration; the process refuses to start on error
    pub fn validate(&self) -> Result<()> {
        self.master_key()?;
        self.signer_url()?;

        if self.request_timeout_ms == 0 {
            return Err(SignerError::Config("REQUEST_TIMEOUT_MS must be positive".into()));
        }
        if self.signing_lease_secs == 0 {
            return Err(SignerError::Config("SIGNING_LEASE_SECS must be positive".into()));
        }
        // Fetch, sign and store each get a full timeout, with a quarter of
        // the lease left over for finalize
        let lease_ms = self.signing_lease_secs.saturating_mul(1000);
        if lease_ms <= self.request_timeout_ms.saturating_mul(4) {
            return Err(SignerError::Config(format!(
                "SIGNING_LEASE_SECS ({}s) must exceed four times REQUEST_TIMEOUT_MS ({}ms)",
                self.signing_lease_secs, self.request_timeout_ms
            )));
        }
        if self.max_task_deliveries < 1 {
            return Err(SignerError::Config("MAX_TASK_DELIVERIES must be at least 1".into()));
        }
        if !matches!(self.log_format.to_ascii_lowercase().as_str(), "text" | "json") {
            return Err(SignerError::Config(format!(
                "LOG_FORMAT must be text or json, got {}",
                self.log_format
            )));
        }

        Ok(())
    }
}
