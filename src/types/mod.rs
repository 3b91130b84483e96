//! Shared types for cosigner

pub mod error;

pub use error::{PipelineStage, Result, SignerError};
