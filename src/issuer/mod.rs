//! OTP issuance: turns delivery tasks into pending signing sessions

pub mod consumer;
pub mod service;

pub use consumer::{TaskConsumer, TaskConsumerConfig};
pub use service::{CodeDispatcher, IssueOutcome, OtpIssuer};
