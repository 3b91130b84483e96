//! MongoDB document structures

mod metadata;
mod signing_session;

pub use metadata::Metadata;
pub use signing_session::{SigningLeaseDoc, SigningSessionDoc, SIGNING_SESSION_COLLECTION};
