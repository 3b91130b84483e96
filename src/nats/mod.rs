//! NATS messaging: connection, message types and publishers

pub mod client;
pub mod messages;
pub mod publisher;

pub use client::NatsClient;
pub use messages::{OtpNotice, SignedArtifactEvent};
pub use publisher::{NatsArtifactNotifier, NatsCodeDispatcher};
