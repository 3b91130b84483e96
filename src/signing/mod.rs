//! Request-facing signing: OTP verification and the signing pipeline

pub mod orchestrator;

pub use orchestrator::{
    signed_download_url, ArtifactNotifier, SignOutcome, SigningConfig, SigningOrchestrator,
};
