//! Signing sessions: the model and the repository boundary

pub mod model;
pub mod repository;

pub use model::{
    signed_blob_key, CreateOutcome, DeliveryTask, SessionState, SignRequest, SigningArtifacts,
    SigningLease, SigningSession, MAX_ATTEMPTS,
};
pub use repository::{InMemorySessionRepository, SessionRepository};
